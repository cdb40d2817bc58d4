//! In-memory SQLite analytical engine.
//!
//! One `Connection` serializes every statement, which is the whole
//! concurrency story: there is no lock because the engine is single-writer.
//! Schema for each card-bearing table carries the domain columns, one typed
//! column per promoted annotation key, and the opaque `annotations` JSON
//! blob. The blob is the durable source of truth; promoted columns are
//! strictly read optimizations.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CatalogError, Result};
use crate::types::{Annotations, AnnotationValue, CardTable, SpeciesFacts};

// ── Promoted annotation keys ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotedKind {
    Text,
    Bool,
    /// Stored as a JSON string-array column.
    List,
}

/// The fixed promoted set. Each key has a dedicated typed column on both
/// card tables, written alongside the blob on every annotation write.
pub const PROMOTED_KEYS: &[(&str, PromotedKind)] = &[
    ("unique_id", PromotedKind::Text),
    ("owned", PromotedKind::Bool),
    ("quantity", PromotedKind::Text),
    ("condition", PromotedKind::Text),
    ("notes", PromotedKind::Text),
    ("location", PromotedKind::Text),
    ("color", PromotedKind::Text),
    ("shape", PromotedKind::Text),
    ("evolution_line", PromotedKind::List),
];

pub fn is_promoted(key: &str) -> bool {
    PROMOTED_KEYS.iter().any(|(k, _)| *k == key)
}

/// Price fallback chain, fixed priority order, evaluated inside the engine
/// so it can serve as a sort/filter expression.
pub const PRICE_EXPR: &str = "COALESCE(\
    json_extract(prices, '$.tcgplayer.prices.holofoil.market'), \
    json_extract(prices, '$.tcgplayer.prices.reverseHolofoil.market'), \
    json_extract(prices, '$.tcgplayer.prices.normal.market'), \
    json_extract(prices, '$.tcgplayer.prices.\"1stEditionHolofoil\".market'), \
    json_extract(prices, '$.cardmarket.prices.trendPrice'))";

// ── Schema SQL ───────────────────────────────────────────────────────────

const PROMOTED_COLUMNS_SQL: &str = "
    unique_id      TEXT,
    owned          INTEGER,
    quantity       TEXT,
    condition      TEXT,
    notes          TEXT,
    location       TEXT,
    color          TEXT,
    shape          TEXT,
    evolution_line TEXT,
    annotations    TEXT NOT NULL DEFAULT '{}'";

fn schema_sql() -> String {
    format!(
        "
CREATE TABLE IF NOT EXISTS tcg_cards (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL DEFAULT '',
    supertype       TEXT,
    subtypes        TEXT DEFAULT '[]',
    hp              TEXT,
    types           TEXT DEFAULT '[]',
    evolves_from    TEXT,
    rarity          TEXT,
    artist          TEXT,
    set_id          TEXT,
    set_name        TEXT,
    set_series      TEXT,
    number          TEXT,
    regulation_mark TEXT,
    image_small     TEXT,
    image_large     TEXT,
    raw_data        TEXT,
    prices          TEXT,
    is_custom       INTEGER NOT NULL DEFAULT 0,
    custom_source   TEXT,
{promoted}
);

CREATE INDEX IF NOT EXISTS idx_tcg_set ON tcg_cards(set_id);
CREATE INDEX IF NOT EXISTS idx_tcg_owned ON tcg_cards(owned) WHERE owned IS NOT NULL;

CREATE TABLE IF NOT EXISTS pocket_cards (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL DEFAULT '',
    set_id          TEXT,
    number          TEXT,
    rarity          TEXT,
    card_type       TEXT,
    element         TEXT,
    hp              TEXT,
    stage           TEXT,
    retreat_cost    TEXT,
    weakness        TEXT,
    evolves_from    TEXT,
    packs           TEXT DEFAULT '[]',
    image_url       TEXT,
    image_filename  TEXT,
    illustrator     TEXT,
    raw_data        TEXT,
    is_custom       INTEGER NOT NULL DEFAULT 0,
    custom_source   TEXT,
{promoted}
);

CREATE INDEX IF NOT EXISTS idx_pocket_set ON pocket_cards(set_id);
CREATE INDEX IF NOT EXISTS idx_pocket_owned ON pocket_cards(owned) WHERE owned IS NOT NULL;

CREATE TABLE IF NOT EXISTS sets (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL DEFAULT '',
    series        TEXT,
    printed_total INTEGER,
    total         INTEGER,
    release_date  TEXT,
    symbol_url    TEXT,
    logo_url      TEXT,
    is_custom     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pocket_sets (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL DEFAULT '',
    series       TEXT,
    release_date TEXT,
    is_custom    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pokemon_metadata (
    pokedex_number     INTEGER PRIMARY KEY,
    name               TEXT NOT NULL DEFAULT '',
    region             TEXT,
    generation         INTEGER,
    color              TEXT,
    shape              TEXT,
    genus              TEXT,
    encounter_location TEXT,
    evolution_chain    TEXT DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS attribute_defs (
    key           TEXT PRIMARY KEY,
    label         TEXT NOT NULL DEFAULT '',
    value_type    TEXT NOT NULL DEFAULT 'text',
    options       TEXT DEFAULT '[]',
    default_value TEXT,
    is_builtin    INTEGER NOT NULL DEFAULT 0,
    sort_order    INTEGER NOT NULL DEFAULT 0
);
",
        promoted = PROMOTED_COLUMNS_SQL
    )
}

// ── Engine ───────────────────────────────────────────────────────────────

pub struct Engine {
    conn: Connection,
}

impl Engine {
    pub fn new() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&schema_sql())?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Source resolution ────────────────────────────────────────────

    /// Shared source-resolution state machine: hint given → use it, else
    /// probe in fixed order. Side-effect-free and deterministic.
    pub fn resolve(&self, id: &str, source: Option<&str>) -> Result<CardTable> {
        match source.filter(|s| !s.trim().is_empty()) {
            Some(hint) => {
                if let Some(table) = CardTable::from_hint(hint) {
                    if self.has_row(table, id)? {
                        return Ok(table);
                    }
                    return Err(CatalogError::not_found(format!(
                        "card '{id}' in {}",
                        table.table_name()
                    )));
                }
                // Open custom source name: find the table holding a custom
                // row with this id and source label.
                for table in CardTable::PROBE_ORDER {
                    let found: Option<i64> = self
                        .conn
                        .query_row(
                            &format!(
                                "SELECT 1 FROM {} WHERE id = ?1 AND custom_source = ?2 COLLATE NOCASE",
                                table.table_name()
                            ),
                            params![id, hint],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if found.is_some() {
                        return Ok(table);
                    }
                }
                Err(CatalogError::not_found(format!(
                    "card '{id}' with source '{hint}'"
                )))
            }
            None => {
                for table in CardTable::PROBE_ORDER {
                    if self.has_row(table, id)? {
                        return Ok(table);
                    }
                }
                Err(CatalogError::not_found(format!("card '{id}'")))
            }
        }
    }

    pub fn has_row(&self, table: CardTable, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table.table_name()),
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ── Annotation blob access ───────────────────────────────────────

    /// Read the blob column alone. `None` means the row does not exist.
    pub fn annotations_blob(&self, table: CardTable, id: &str) -> Result<Option<Annotations>> {
        let blob: Option<String> = match self.conn.query_row(
            &format!(
                "SELECT annotations FROM {} WHERE id = ?1",
                table.table_name()
            ),
            params![id],
            |row| row.get(0),
        ) {
            Ok(b) => b,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(parse_annotations(blob.as_deref())))
    }

    /// Dual write: the full map goes to the blob, and every promoted key is
    /// also materialized into its typed column (NULL when absent).
    pub fn write_annotations(
        &self,
        table: CardTable,
        id: &str,
        annotations: &Annotations,
    ) -> Result<()> {
        let blob = serde_json::to_string(annotations)?;
        let text = |key: &str| -> Option<String> {
            annotations.get(key).and_then(|v| match v {
                AnnotationValue::Text(s) => Some(s.clone()),
                AnnotationValue::Bool(b) => Some(b.to_string()),
                AnnotationValue::List(_) => None,
            })
        };
        let owned: Option<i64> = annotations
            .get("owned")
            .and_then(AnnotationValue::as_bool)
            .map(i64::from);
        let evolution_line: Option<String> = annotations.get("evolution_line").map(|v| match v {
            AnnotationValue::List(items) => {
                serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
            }
            AnnotationValue::Text(s) => {
                serde_json::to_string(&[s]).unwrap_or_else(|_| "[]".into())
            }
            AnnotationValue::Bool(_) => "[]".into(),
        });

        let updated = self.conn.execute(
            &format!(
                "UPDATE {} SET annotations = ?1, unique_id = ?2, owned = ?3, quantity = ?4,
                        condition = ?5, notes = ?6, location = ?7, color = ?8, shape = ?9,
                        evolution_line = ?10
                 WHERE id = ?11",
                table.table_name()
            ),
            params![
                blob,
                text("unique_id"),
                owned,
                text("quantity"),
                text("condition"),
                text("notes"),
                text("location"),
                text("color"),
                text("shape"),
                evolution_line,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(CatalogError::not_found(format!(
                "card '{id}' in {}",
                table.table_name()
            )));
        }
        Ok(())
    }

    /// All rows of a table with a non-empty annotation map. Feeds resync and
    /// export.
    pub fn annotated_rows(&self, table: CardTable) -> Result<Vec<(String, Annotations)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, annotations FROM {}
             WHERE annotations IS NOT NULL AND annotations != '{{}}'
             ORDER BY id",
            table.table_name()
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            let map = parse_annotations(blob.as_deref());
            if !map.is_empty() {
                out.push((id, map));
            }
        }
        Ok(out)
    }

    // ── Reference metadata join ──────────────────────────────────────

    /// Derived lookup: TCG card → first national pokedex number in the raw
    /// blob → species row. Pocket cards carry no pokedex link.
    pub fn species_for_card(&self, table: CardTable, id: &str) -> Result<Option<SpeciesFacts>> {
        if table != CardTable::Tcg {
            return Ok(None);
        }
        let row = self.conn.query_row(
            "SELECT m.pokedex_number, m.name, m.region, m.generation, m.color, m.shape,
                    m.genus, m.encounter_location, m.evolution_chain
             FROM tcg_cards c
             JOIN pokemon_metadata m
               ON m.pokedex_number = json_extract(c.raw_data, '$.nationalPokedexNumbers[0]')
             WHERE c.id = ?1",
            params![id],
            |row| {
                let chain_json: Option<String> = row.get(8)?;
                Ok(SpeciesFacts {
                    pokedex_number: row.get(0)?,
                    name: row.get(1)?,
                    region: row.get(2)?,
                    generation: row.get(3)?,
                    color: row.get(4)?,
                    shape: row.get(5)?,
                    genus: row.get(6)?,
                    encounter_location: row.get(7)?,
                    evolution_chain: chain_json
                        .and_then(|j| serde_json::from_str(&j).ok())
                        .unwrap_or_default(),
                })
            },
        );
        match row {
            Ok(facts) => Ok(Some(facts)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Tolerant blob parse: malformed or foreign-typed entries are coerced
/// rather than dropped, so ad-hoc writes cannot make a card unreadable.
pub fn parse_annotations(blob: Option<&str>) -> Annotations {
    let Some(blob) = blob else {
        return Annotations::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(blob) else {
        return Annotations::new();
    };
    let Some(object) = value.as_object() else {
        return Annotations::new();
    };
    object
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), coerce_annotation_value(v)))
        .collect()
}

/// Fold an arbitrary JSON value into the closed annotation value set:
/// bool stays bool, strings stay strings, arrays become string lists,
/// anything else becomes its JSON text.
pub fn coerce_annotation_value(value: &serde_json::Value) -> AnnotationValue {
    match value {
        serde_json::Value::Bool(b) => AnnotationValue::Bool(*b),
        serde_json::Value::String(s) => AnnotationValue::Text(s.clone()),
        serde_json::Value::Array(items) => AnnotationValue::List(
            items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        other => AnnotationValue::Text(other.to_string()),
    }
}

/// Denormalize one annotation value back into plain JSON (export path).
pub fn annotation_value_to_json(value: &AnnotationValue) -> serde_json::Value {
    match value {
        AnnotationValue::Bool(b) => serde_json::Value::Bool(*b),
        AnnotationValue::Text(s) => serde_json::Value::String(s.clone()),
        AnnotationValue::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|s| serde_json::Value::String(s.clone()))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_card(engine: &Engine, id: &str) {
        engine
            .conn()
            .execute(
                "INSERT INTO tcg_cards (id, name) VALUES (?1, ?2)",
                params![id, "Test Card"],
            )
            .unwrap();
    }

    #[test]
    fn schema_builds() {
        let engine = Engine::new().unwrap();
        let count: i64 = engine
            .conn()
            .query_row("SELECT COUNT(*) FROM tcg_cards", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn resolve_probes_in_fixed_order() {
        let engine = Engine::new().unwrap();
        // Same id in both tables: TCG wins when no hint is given.
        seed_card(&engine, "dup-1");
        engine
            .conn()
            .execute(
                "INSERT INTO pocket_cards (id, name) VALUES ('dup-1', 'Pocket Dup')",
                [],
            )
            .unwrap();
        assert_eq!(engine.resolve("dup-1", None).unwrap(), CardTable::Tcg);
        assert_eq!(
            engine.resolve("dup-1", Some("pocket")).unwrap(),
            CardTable::Pocket
        );
        assert!(matches!(
            engine.resolve("missing", None),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_matches_custom_source_case_insensitively() {
        let engine = Engine::new().unwrap();
        engine
            .conn()
            .execute(
                "INSERT INTO tcg_cards (id, name, is_custom, custom_source)
                 VALUES ('hb-1', 'Proxy Card', 1, 'Homebrew')",
                [],
            )
            .unwrap();
        assert_eq!(
            engine.resolve("hb-1", Some("homebrew")).unwrap(),
            CardTable::Tcg
        );
        assert_eq!(
            engine.resolve("hb-1", Some("HOMEBREW")).unwrap(),
            CardTable::Tcg
        );
        assert!(matches!(
            engine.resolve("hb-1", Some("proxies")),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn dual_write_fills_promoted_columns() {
        let engine = Engine::new().unwrap();
        seed_card(&engine, "base1-1");

        let mut map = Annotations::new();
        map.insert("owned".into(), AnnotationValue::Bool(true));
        map.insert("condition".into(), AnnotationValue::Text("Mint".into()));
        map.insert(
            "evolution_line".into(),
            AnnotationValue::List(vec!["bulbasaur".into(), "ivysaur".into()]),
        );
        map.insert("custom_note".into(), AnnotationValue::Text("hi".into()));
        engine
            .write_annotations(CardTable::Tcg, "base1-1", &map)
            .unwrap();

        let (owned, condition, evo): (i64, String, String) = engine
            .conn()
            .query_row(
                "SELECT owned, condition, evolution_line FROM tcg_cards WHERE id = 'base1-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(owned, 1);
        assert_eq!(condition, "Mint");
        assert_eq!(evo, r#"["bulbasaur","ivysaur"]"#);

        let read = engine
            .annotations_blob(CardTable::Tcg, "base1-1")
            .unwrap()
            .unwrap();
        assert_eq!(read, map);
    }

    #[test]
    fn write_to_missing_row_is_not_found() {
        let engine = Engine::new().unwrap();
        let map = Annotations::new();
        assert!(matches!(
            engine.write_annotations(CardTable::Tcg, "nope", &map),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn coerces_foreign_values() {
        let map = parse_annotations(Some(r#"{"hp": 120, "tags": ["a", 2], "ok": true}"#));
        assert_eq!(map["hp"], AnnotationValue::Text("120".into()));
        assert_eq!(
            map["tags"],
            AnnotationValue::List(vec!["a".into(), "2".into()])
        );
        assert_eq!(map["ok"], AnnotationValue::Bool(true));
    }
}
