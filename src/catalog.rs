//! Unified card catalog: the context object owning the engine and the
//! durable mirror, plus the one logical query surface over the two physical
//! card tables.
//!
//! Filter and sort field names never reach SQL from user input: fields are
//! closed struct members validated against per-table capability maps, and
//! sort identifiers come from a fixed allow-list with a silent fallback.
//! Filter values always bind as parameters.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;
use serde_json::{Map, Value};

use crate::adhoc;
use crate::annotations::{
    self, mirror_annotations, patch_annotations, populate_derived, restore_attribute_definition,
    seed_builtin_defs,
};
use crate::cache::{Collection, DurableStore, SqliteStore};
use crate::engine::{coerce_annotation_value, parse_annotations, Engine, PRICE_EXPR};
use crate::error::{CatalogError, Result};
use crate::loader::{insert_custom_card, load_all, LoadReport, SnapshotPaths};
use crate::sync;
use crate::types::{
    AnnotationPatch, AnnotationValue, Annotations, AttributeDefinition, Card, CardFilters,
    CardPage, CardSet, CardTable, CatalogSnapshot, CollectionStats, FilterOptions, PageRequest,
    SetOption, SortSpec, StatementOutcome,
};

// ── Context object ───────────────────────────────────────────────────────

pub struct Catalog {
    engine: Engine,
    store: Box<dyn DurableStore>,
    pub load_report: LoadReport,
    pub hydration: HydrationReport,
}

#[derive(Debug, Default)]
pub struct HydrationReport {
    pub annotations: usize,
    pub attribute_defs: usize,
    pub custom_sets: usize,
    pub custom_cards: usize,
    pub skipped: usize,
}

impl Catalog {
    /// Full startup sequence: schema + snapshot load, builtin attribute
    /// seeding, then hydration replay from the on-disk mirror.
    pub fn open(paths: &SnapshotPaths, cache_path: &Path) -> Result<Self> {
        let store = SqliteStore::open_or_create(cache_path)?;
        Self::open_with_store(paths, Box::new(store))
    }

    pub fn open_with_store(paths: &SnapshotPaths, store: Box<dyn DurableStore>) -> Result<Self> {
        let engine = Engine::new()?;
        let load_report = load_all(&engine, paths)?;
        seed_builtin_defs(&engine)?;
        let hydration = hydrate(&engine, store.as_ref())?;
        Ok(Self {
            engine,
            store,
            load_report,
            hydration,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn store(&self) -> &dyn DurableStore {
        self.store.as_ref()
    }

    // ── Query surface ────────────────────────────────────────────────

    pub fn list_cards(
        &self,
        filters: &CardFilters,
        sort: &SortSpec,
        page: PageRequest,
    ) -> Result<CardPage> {
        let subqueries = build_subqueries(filters);
        if subqueries.is_empty() {
            return Ok(CardPage {
                cards: Vec::new(),
                total: 0,
            });
        }

        let union: Vec<&str> = subqueries.iter().map(|(sql, _)| sql.as_str()).collect();
        let union_sql = union.join(" UNION ALL ");
        let mut binds: Vec<Bind> = subqueries
            .iter()
            .flat_map(|(_, binds)| binds.iter().cloned())
            .collect();

        let total: u64 = self.engine.conn().query_row(
            &format!("SELECT COUNT(*) FROM ({union_sql})"),
            rusqlite::params_from_iter(binds.iter()),
            |row| row.get(0),
        )?;

        let (order_col, descending) = resolve_sort(sort);
        let direction = if descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT * FROM ({union_sql}) ORDER BY {order_col} {direction}, id ASC LIMIT ? OFFSET ?"
        );
        binds.push(Bind::Int(i64::from(page.page_size)));
        binds.push(Bind::Int(page.offset() as i64));

        let mut stmt = self.engine.conn().prepare(&sql)?;
        let cards = stmt
            .query_map(rusqlite::params_from_iter(binds.iter()), row_to_card)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(CardPage { cards, total })
    }

    /// Full read of one card: shared projection, merged annotations
    /// (promoted columns lowest, blob overriding), joined species facts,
    /// then derived-field auto-population.
    pub fn get_card(&self, id: &str, source: Option<&str>) -> Result<Card> {
        let table = self.engine.resolve(id, source)?;
        let sql = format!("{} WHERE id = ?", projection_sql(table));
        let mut card = self
            .engine
            .conn()
            .query_row(&sql, rusqlite::params![id], row_to_card)?;

        let mut merged = self.read_merged_annotations(table, id)?;
        let species = self.engine.species_for_card(table, id)?;
        populate_derived(
            &self.engine,
            self.store.as_ref(),
            table,
            id,
            card.is_custom,
            species.as_ref(),
            &mut merged,
        )?;
        card.annotations = merged;
        card.species = species;
        Ok(card)
    }

    /// Promoted columns first, blob entries overriding. The blob is the
    /// source of truth; divergence only appears after ad-hoc column writes.
    fn read_merged_annotations(&self, table: CardTable, id: &str) -> Result<Annotations> {
        let sql = format!(
            "SELECT unique_id, owned, quantity, condition, notes, location, color, shape,
                    evolution_line, annotations
             FROM {} WHERE id = ?1",
            table.table_name()
        );
        let (mut merged, blob) = self.engine.conn().query_row(
            &sql,
            rusqlite::params![id],
            |row| {
                let mut map = Annotations::new();
                let text_cols = [
                    (0, "unique_id"),
                    (2, "quantity"),
                    (3, "condition"),
                    (4, "notes"),
                    (5, "location"),
                    (6, "color"),
                    (7, "shape"),
                ];
                for (i, key) in text_cols {
                    if let Some(text) = row.get::<_, Option<String>>(i)? {
                        map.insert(key.to_string(), AnnotationValue::Text(text));
                    }
                }
                if let Some(owned) = row.get::<_, Option<i64>>(1)? {
                    map.insert("owned".into(), AnnotationValue::Bool(owned != 0));
                }
                if let Some(line) = row.get::<_, Option<String>>(8)? {
                    let items: Vec<String> = serde_json::from_str(&line).unwrap_or_default();
                    if !items.is_empty() {
                        map.insert("evolution_line".into(), AnnotationValue::List(items));
                    }
                }
                Ok((map, row.get::<_, Option<String>>(9)?))
            },
        )?;
        for (key, value) in parse_annotations(blob.as_deref()) {
            merged.insert(key, value);
        }
        Ok(merged)
    }

    pub fn list_filter_options(&self, source: Option<&str>) -> Result<FilterOptions> {
        let tables = tables_for_hint(source)?;
        let mut supertypes = BTreeSet::new();
        let mut rarities = BTreeSet::new();
        let mut card_types = BTreeSet::new();
        let mut sets = Vec::new();
        for table in &tables {
            let supertype_col = match table {
                CardTable::Tcg => "supertype",
                CardTable::Pocket => "card_type",
            };
            collect_distinct(&self.engine, table.table_name(), supertype_col, &mut supertypes)?;
            collect_distinct(&self.engine, table.table_name(), "rarity", &mut rarities)?;
            match table {
                CardTable::Tcg => {
                    let mut stmt = self.engine.conn().prepare(
                        "SELECT DISTINCT je.value FROM tcg_cards,
                                json_each(COALESCE(types, '[]')) je
                         WHERE je.value IS NOT NULL",
                    )?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        card_types.insert(row.get::<_, String>(0)?);
                    }
                }
                CardTable::Pocket => {
                    collect_distinct(&self.engine, "pocket_cards", "element", &mut card_types)?;
                }
            }
            let mut stmt = self.engine.conn().prepare(&format!(
                "SELECT id, name FROM {} ORDER BY name",
                table.sets_table_name()
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                sets.push(SetOption {
                    id: row.get(0)?,
                    name: row.get(1)?,
                });
            }
        }
        Ok(FilterOptions {
            supertypes: supertypes.into_iter().collect(),
            rarities: rarities.into_iter().collect(),
            card_types: card_types.into_iter().collect(),
            sets,
        })
    }

    // ── Sets ─────────────────────────────────────────────────────────

    pub fn list_sets(&self, source: Option<&str>) -> Result<Vec<CardSet>> {
        let mut out = Vec::new();
        for table in tables_for_hint(source)? {
            let mut stmt = self.engine.conn().prepare(&format!(
                "SELECT id, name, series, release_date, is_custom FROM {} ORDER BY name",
                table.sets_table_name()
            ))?;
            let sets = stmt.query_map([], |row| {
                Ok(CardSet {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    series: row.get(2)?,
                    release_date: row.get(3)?,
                    is_custom: row.get::<_, i64>(4)? != 0,
                    table: Some(table),
                })
            })?;
            for set in sets {
                out.push(set?);
            }
        }
        Ok(out)
    }

    /// Append a user-created set to the chosen sets table, write-through to
    /// the mirror. Native reference sets are never mutated.
    pub fn add_set(&self, table: CardTable, set: &CardSet) -> Result<CardSet> {
        if set.id.trim().is_empty() || set.name.trim().is_empty() {
            return Err(CatalogError::validation("a set needs an id and a name"));
        }
        let exists: i64 = self.engine.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE id = ?1",
                table.sets_table_name()
            ),
            rusqlite::params![set.id],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(CatalogError::validation(format!(
                "set '{}' already exists",
                set.id
            )));
        }
        self.engine.conn().execute(
            &format!(
                "INSERT INTO {} (id, name, series, release_date, is_custom)
                 VALUES (?1, ?2, ?3, ?4, 1)",
                table.sets_table_name()
            ),
            rusqlite::params![set.id, set.name, set.series, set.release_date],
        )?;
        let created = CardSet {
            id: set.id.clone(),
            name: set.name.clone(),
            series: set.series.clone(),
            release_date: set.release_date.clone(),
            is_custom: true,
            table: Some(table),
        };
        if let Err(e) = self.store.put(
            Collection::CustomSets,
            &created.id,
            &serde_json::to_value(&created)?,
        ) {
            eprintln!("[cache] custom set mirror write failed for '{}': {e}", created.id);
        }
        Ok(created)
    }

    // ── Custom cards ─────────────────────────────────────────────────

    /// Insert a user-authored card record (table routing hint required),
    /// write-through to the mirror, return the full card view.
    pub fn add_card(&self, record: &Map<String, Value>) -> Result<Card> {
        let (table, id) = insert_custom_card(&self.engine, record)?;
        let mut mirrored = record.clone();
        mirrored.insert("table".into(), Value::from(table.table_name()));
        if let Err(e) = self
            .store
            .put(Collection::CustomCards, &id, &Value::Object(mirrored))
        {
            eprintln!("[cache] custom card mirror write failed for '{id}': {e}");
        }
        if let Some(blob) = self.engine.annotations_blob(table, &id)? {
            if !blob.is_empty() {
                mirror_annotations(self.store.as_ref(), table, &id, &blob);
            }
        }
        self.get_card(&id, Some(table.table_name()))
    }

    /// Delete custom rows by id. Native rows are never deleted; hitting one
    /// is a validation error. Unknown ids are skipped. Returns the number of
    /// rows removed.
    pub fn delete_cards(&self, ids: &[String]) -> Result<usize> {
        let mut deleted = 0usize;
        for id in ids {
            let table = match self.engine.resolve(id, None) {
                Ok(table) => table,
                Err(CatalogError::NotFound(_)) => {
                    eprintln!("[catalog] delete: unknown card '{id}', skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let is_custom: i64 = self.engine.conn().query_row(
                &format!(
                    "SELECT is_custom FROM {} WHERE id = ?1",
                    table.table_name()
                ),
                rusqlite::params![id],
                |row| row.get(0),
            )?;
            if is_custom == 0 {
                return Err(CatalogError::validation(format!(
                    "card '{id}' is a native row and cannot be deleted"
                )));
            }
            self.engine.conn().execute(
                &format!("DELETE FROM {} WHERE id = ?1", table.table_name()),
                rusqlite::params![id],
            )?;
            for (collection, key) in [
                (Collection::CustomCards, id.as_str()),
                (Collection::Annotations, id.as_str()),
            ] {
                if let Err(e) = self.store.delete(collection, key) {
                    eprintln!("[cache] mirror delete failed for '{key}': {e}");
                }
            }
            deleted += 1;
        }
        Ok(deleted)
    }

    // ── Annotation store pass-through ────────────────────────────────

    pub fn fetch_annotations(&self, id: &str, source: Option<&str>) -> Result<Annotations> {
        annotations::fetch_annotations(&self.engine, id, source)
    }

    pub fn patch_annotations(
        &self,
        id: &str,
        source: Option<&str>,
        patch: &AnnotationPatch,
    ) -> Result<Annotations> {
        patch_annotations(&self.engine, self.store.as_ref(), id, source, patch)
    }

    pub fn list_attribute_definitions(&self) -> Result<Vec<AttributeDefinition>> {
        annotations::list_attribute_definitions(&self.engine)
    }

    pub fn create_attribute_definition(
        &self,
        def: &AttributeDefinition,
    ) -> Result<AttributeDefinition> {
        annotations::create_attribute_definition(&self.engine, self.store.as_ref(), def)
    }

    pub fn delete_attribute_definition(&self, key: &str) -> Result<()> {
        annotations::delete_attribute_definition(&self.engine, self.store.as_ref(), key)
    }

    // ── Ad-hoc executor + sync ───────────────────────────────────────

    /// Run an arbitrary statement; write statements trigger a cache resync
    /// of the tables they touched.
    pub fn run_statement(&self, text: &str) -> Result<StatementOutcome> {
        let outcome = adhoc::run_statement(&self.engine, text)?;
        if matches!(outcome, StatementOutcome::Ack { .. }) {
            sync::resync_after_statement(&self.engine, self.store.as_ref(), text)?;
        }
        Ok(outcome)
    }

    pub fn export_snapshot(&self) -> Result<CatalogSnapshot> {
        sync::export_snapshot(&self.engine)
    }

    pub fn snapshot_revision(&self) -> Result<String> {
        sync::snapshot_revision(&self.export_snapshot()?)
    }

    pub fn push_snapshot(
        &self,
        remote: &dyn sync::RemoteStore,
        path: &str,
        message: &str,
    ) -> Result<String> {
        sync::push_snapshot(&self.engine, remote, path, message)
    }

    // ── Statistics ───────────────────────────────────────────────────

    pub fn collection_stats(&self) -> Result<CollectionStats> {
        let mut stats = CollectionStats::default();
        for table in CardTable::PROBE_ORDER {
            let (count, owned): (u64, u64) = self.engine.conn().query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(owned = 1), 0) FROM {}",
                    table.table_name()
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            stats.total += count;
            stats.owned += owned;

            let mut stmt = self.engine.conn().prepare(&format!(
                "SELECT {}, COUNT(*) FROM {} GROUP BY 1",
                source_expr(table),
                table.table_name()
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let label: String = row.get(0)?;
                let count: u64 = row.get(1)?;
                *stats.by_source.entry(label).or_insert(0) += count;
            }
        }
        Ok(stats)
    }
}

// ── Hydration ────────────────────────────────────────────────────────────

/// Replay the mirror into a freshly loaded engine. Fixed order: annotations
/// first, then attribute definitions, custom sets, and custom cards.
/// Annotation entries whose row does not exist yet (custom cards) are
/// retried once after custom-card replay, so a patch written after the card
/// was added still wins over the record's embedded values.
fn hydrate(engine: &Engine, store: &dyn DurableStore) -> Result<HydrationReport> {
    let mut report = HydrationReport::default();

    let mut deferred: Vec<(String, Annotations)> = Vec::new();
    for (id, value) in store.get_all(Collection::Annotations)? {
        let Some(map) = cached_annotation_map(&value) else {
            report.skipped += 1;
            continue;
        };
        if replay_annotations(engine, &id, &value, &map)? {
            report.annotations += 1;
        } else {
            deferred.push((id, map));
        }
    }

    for (_, value) in store.get_all(Collection::AttributeDefs)? {
        match serde_json::from_value::<AttributeDefinition>(value) {
            Ok(def) => {
                if restore_attribute_definition(engine, &def)? {
                    report.attribute_defs += 1;
                } else {
                    report.skipped += 1;
                }
            }
            Err(e) => {
                eprintln!("[cache] hydration: bad attribute record: {e}");
                report.skipped += 1;
            }
        }
    }

    for (key, value) in store.get_all(Collection::CustomSets)? {
        match serde_json::from_value::<CardSet>(value) {
            Ok(set) => {
                let table = set.table.unwrap_or(CardTable::Tcg);
                engine.conn().execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} (id, name, series, release_date, is_custom)
                         VALUES (?1, ?2, ?3, ?4, 1)",
                        table.sets_table_name()
                    ),
                    rusqlite::params![set.id, set.name, set.series, set.release_date],
                )?;
                report.custom_sets += 1;
            }
            Err(e) => {
                eprintln!("[cache] hydration: bad custom set '{key}': {e}");
                report.skipped += 1;
            }
        }
    }

    for (key, value) in store.get_all(Collection::CustomCards)? {
        let Value::Object(record) = value else {
            report.skipped += 1;
            continue;
        };
        match insert_custom_card(engine, &record) {
            Ok(_) => report.custom_cards += 1,
            Err(e) => {
                eprintln!("[cache] hydration: custom card '{key}' skipped: {e}");
                report.skipped += 1;
            }
        }
    }

    for (id, map) in deferred {
        match engine.resolve(&id, None) {
            Ok(table) => {
                engine.write_annotations(table, &id, &map)?;
                report.annotations += 1;
            }
            Err(CatalogError::NotFound(_)) => {
                eprintln!("[cache] hydration: no row for annotated card '{id}', skipped");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

/// Cached records carry `{"table": ..., "annotations": {...}}`; records from
/// older mirrors may be the bare map. Null entries are dropped at replay.
fn cached_annotation_map(value: &Value) -> Option<Annotations> {
    let object = match value.get("annotations") {
        Some(inner) => inner.as_object()?,
        None => value.as_object()?,
    };
    let map: Annotations = object
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), coerce_annotation_value(v)))
        .collect();
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Returns Ok(false) when no row matches yet (deferred to post-custom-card
/// replay).
fn replay_annotations(
    engine: &Engine,
    id: &str,
    value: &Value,
    map: &Annotations,
) -> Result<bool> {
    let tagged = value
        .get("table")
        .and_then(Value::as_str)
        .and_then(CardTable::from_hint);
    let table = match tagged {
        Some(t) if engine.has_row(t, id)? => Some(t),
        _ => engine.resolve(id, None).ok(),
    };
    match table {
        Some(table) => {
            engine.write_annotations(table, id, map)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

// ── Query building ───────────────────────────────────────────────────────

/// Owned bind value: keeps dynamically built parameter lists clonable so
/// the count and page queries can share them.
#[derive(Debug, Clone)]
enum Bind {
    Text(String),
    Int(i64),
    Real(f64),
}

impl ToSql for Bind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Bind::Text(s) => s.to_sql(),
            Bind::Int(i) => i.to_sql(),
            Bind::Real(f) => f.to_sql(),
        }
    }
}

fn source_expr(table: CardTable) -> String {
    format!(
        "CASE WHEN is_custom = 1 THEN COALESCE(custom_source, 'Custom') ELSE '{}' END",
        table.source_label()
    )
}

/// The shared display projection every physical row maps through. Column
/// order is fixed; `row_to_card` indexes into it.
fn projection_sql(table: CardTable) -> String {
    match table {
        CardTable::Tcg => format!(
            "SELECT id, name, {source} AS source, 'tcg_cards' AS tbl, is_custom,
                    supertype, CAST(hp AS INTEGER) AS hp, COALESCE(types, '[]') AS types,
                    rarity, set_id, set_name, number, image_small, image_large,
                    {price} AS market_price, annotations
             FROM tcg_cards",
            source = source_expr(table),
            price = PRICE_EXPR
        ),
        CardTable::Pocket => format!(
            "SELECT id, name, {source} AS source, 'pocket_cards' AS tbl, is_custom,
                    card_type AS supertype, CAST(hp AS INTEGER) AS hp,
                    CASE WHEN element IS NULL THEN '[]' ELSE json_array(element) END AS types,
                    rarity, set_id, NULL AS set_name, number, image_url AS image_small,
                    NULL AS image_large, NULL AS market_price, annotations
             FROM pocket_cards",
            source = source_expr(table)
        ),
    }
}

fn row_to_card(row: &rusqlite::Row) -> std::result::Result<Card, rusqlite::Error> {
    let types_json: Option<String> = row.get(7)?;
    let blob: Option<String> = row.get(15)?;
    Ok(Card {
        id: row.get(0)?,
        name: row.get(1)?,
        source: row.get(2)?,
        table: CardTable::from_hint(&row.get::<_, String>(3)?).unwrap_or(CardTable::Tcg),
        is_custom: row.get::<_, i64>(4)? != 0,
        supertype: row.get(5)?,
        hp: row.get(6)?,
        types: types_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        rarity: row.get(8)?,
        set_id: row.get(9)?,
        set_name: row.get(10)?,
        number: row.get(11)?,
        image_small: row.get(12)?,
        image_large: row.get(13)?,
        market_price: row.get(14)?,
        annotations: parse_annotations(blob.as_deref()),
        species: None,
    })
}

/// Which tables an optional source hint selects, and whether a filter the
/// table cannot express drops the filter (explicit single source) or the
/// whole sub-query (best-effort union).
enum SourceSelection {
    All,
    Single(CardTable),
    Custom(String),
}

fn source_selection(filters: &CardFilters) -> SourceSelection {
    match filters.source.as_deref().map(str::trim) {
        None | Some("") => SourceSelection::All,
        Some(hint) => match CardTable::from_hint(hint) {
            Some(table) => SourceSelection::Single(table),
            None => SourceSelection::Custom(hint.to_string()),
        },
    }
}

fn tables_for_hint(source: Option<&str>) -> Result<Vec<CardTable>> {
    match source.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(CardTable::PROBE_ORDER.to_vec()),
        Some(hint) => CardTable::from_hint(hint)
            .map(|t| vec![t])
            .ok_or_else(|| CatalogError::validation(format!("unknown source '{hint}'"))),
    }
}

/// One sub-query per participating table. Union mode excludes a table
/// entirely when any active filter has no equivalent column there; explicit
/// single-source mode runs with the table's own supported filter set.
fn build_subqueries(filters: &CardFilters) -> Vec<(String, Vec<Bind>)> {
    let selection = source_selection(filters);
    let (tables, drop_unsupported, custom_source): (Vec<CardTable>, bool, Option<&str>) =
        match &selection {
            SourceSelection::All => (CardTable::PROBE_ORDER.to_vec(), false, None),
            SourceSelection::Single(table) => (vec![*table], true, None),
            SourceSelection::Custom(label) => {
                (CardTable::PROBE_ORDER.to_vec(), false, Some(label.as_str()))
            }
        };

    let mut out = Vec::new();
    for table in tables {
        let mut conditions: Vec<String> = Vec::new();
        let mut binds: Vec<Bind> = Vec::new();
        if let Some(label) = custom_source {
            conditions.push("is_custom = 1 AND custom_source = ? COLLATE NOCASE".into());
            binds.push(Bind::Text(label.to_string()));
        }
        if !append_filter_conditions(table, filters, drop_unsupported, &mut conditions, &mut binds)
        {
            // capability exclusion
            continue;
        }
        let mut sql = projection_sql(table);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        out.push((sql, binds));
    }
    out
}

/// Returns false when the table must be excluded (an unsupported filter in
/// union mode).
fn append_filter_conditions(
    table: CardTable,
    filters: &CardFilters,
    drop_unsupported: bool,
    conditions: &mut Vec<String>,
    binds: &mut Vec<Bind>,
) -> bool {
    let mut unsupported = false;
    let mut require = |supported: Option<(String, Vec<Bind>)>| match supported {
        Some((cond, mut b)) => {
            conditions.push(cond);
            binds.append(&mut b);
        }
        None => unsupported = true,
    };

    if let Some(name) = active(&filters.name) {
        require(Some((
            "name LIKE '%' || ? || '%'".into(),
            vec![Bind::Text(name.to_string())],
        )));
    }
    if let Some(supertype) = active(&filters.supertype) {
        require(match table {
            CardTable::Tcg => Some((
                "supertype = ?".into(),
                vec![Bind::Text(supertype.to_string())],
            )),
            CardTable::Pocket => Some((
                "card_type = ?".into(),
                vec![Bind::Text(supertype.to_string())],
            )),
        });
    }
    if let Some(rarity) = active(&filters.rarity) {
        require(Some((
            "rarity = ?".into(),
            vec![Bind::Text(rarity.to_string())],
        )));
    }
    if let Some(set_id) = active(&filters.set_id) {
        require(Some((
            "set_id = ?".into(),
            vec![Bind::Text(set_id.to_string())],
        )));
    }
    if let Some(card_type) = active(&filters.card_type) {
        require(match table {
            CardTable::Tcg => Some((
                "EXISTS (SELECT 1 FROM json_each(COALESCE(types, '[]')) je \
                 WHERE je.value = ? COLLATE NOCASE)"
                    .into(),
                vec![Bind::Text(card_type.to_string())],
            )),
            CardTable::Pocket => Some((
                "element = ? COLLATE NOCASE".into(),
                vec![Bind::Text(card_type.to_string())],
            )),
        });
    }
    if let Some(owned) = filters.owned {
        let cond = if owned {
            "owned = 1"
        } else {
            "(owned IS NULL OR owned = 0)"
        };
        require(Some((cond.into(), Vec::new())));
    }
    if let Some(hp_min) = filters.hp_min {
        require(Some((
            "CAST(hp AS INTEGER) >= ?".into(),
            vec![Bind::Int(hp_min)],
        )));
    }
    if let Some(hp_max) = filters.hp_max {
        require(Some((
            "CAST(hp AS INTEGER) <= ?".into(),
            vec![Bind::Int(hp_max)],
        )));
    }
    if let Some(price_min) = filters.price_min {
        require(match table {
            CardTable::Tcg => Some((format!("{PRICE_EXPR} >= ?"), vec![Bind::Real(price_min)])),
            CardTable::Pocket => None,
        });
    }
    if let Some(price_max) = filters.price_max {
        require(match table {
            CardTable::Tcg => Some((format!("{PRICE_EXPR} <= ?"), vec![Bind::Real(price_max)])),
            CardTable::Pocket => None,
        });
    }
    if let Some(region) = active(&filters.region) {
        require(match table {
            CardTable::Tcg => Some((
                "EXISTS (SELECT 1 FROM pokemon_metadata m \
                 WHERE m.pokedex_number = json_extract(raw_data, '$.nationalPokedexNumbers[0]') \
                   AND m.region = ? COLLATE NOCASE)"
                    .into(),
                vec![Bind::Text(region.to_string())],
            )),
            CardTable::Pocket => None,
        });
    }
    if let Some(generation) = filters.generation {
        require(match table {
            CardTable::Tcg => Some((
                "EXISTS (SELECT 1 FROM pokemon_metadata m \
                 WHERE m.pokedex_number = json_extract(raw_data, '$.nationalPokedexNumbers[0]') \
                   AND m.generation = ?)"
                    .into(),
                vec![Bind::Int(generation)],
            )),
            CardTable::Pocket => None,
        });
    }
    if let Some(line) = active(&filters.evolution_line) {
        require(Some((
            "EXISTS (SELECT 1 FROM json_each(COALESCE(evolution_line, '[]')) je \
             WHERE je.value = ? COLLATE NOCASE)"
                .into(),
            vec![Bind::Text(line.to_string())],
        )));
    }

    if unsupported && !drop_unsupported {
        return false;
    }
    true
}

fn active(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Sort identifiers come from this fixed allow-list; anything else falls
/// back to the default sort instead of erroring.
const SORTABLE: &[(&str, &str)] = &[
    ("name", "name"),
    ("id", "id"),
    ("number", "number"),
    ("rarity", "rarity"),
    ("set_id", "set_id"),
    ("supertype", "supertype"),
    ("hp", "hp"),
    ("price", "market_price"),
    ("market_price", "market_price"),
];

fn resolve_sort(sort: &SortSpec) -> (&'static str, bool) {
    let column = sort
        .field
        .as_deref()
        .map(str::trim)
        .and_then(|field| {
            SORTABLE
                .iter()
                .find(|(name, _)| field.eq_ignore_ascii_case(name))
                .map(|(_, col)| *col)
        })
        .unwrap_or("name");
    (column, sort.descending)
}

fn collect_distinct(
    engine: &Engine,
    table: &str,
    column: &str,
    out: &mut BTreeSet<String>,
) -> Result<()> {
    let mut stmt = engine.conn().prepare(&format!(
        "SELECT DISTINCT {column} FROM {table} WHERE {column} IS NOT NULL AND {column} != ''"
    ))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        out.insert(row.get(0)?);
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────
