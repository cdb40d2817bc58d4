//! Startup population of the analytical engine.
//!
//! Load order is fixed: native snapshots → reference metadata → custom-card
//! document → annotation overlay. Mandatory snapshots abort startup when
//! absent; optional ones degrade to an empty table with the full schema.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::engine::{coerce_annotation_value, Engine};
use crate::error::{CatalogError, Result};
use crate::types::{Annotations, CardTable};

// Column sets mirror the upstream export pipeline.
const TCG_COLUMNS: &[&str] = &[
    "id",
    "name",
    "supertype",
    "subtypes",
    "hp",
    "types",
    "evolves_from",
    "rarity",
    "artist",
    "set_id",
    "set_name",
    "set_series",
    "number",
    "regulation_mark",
    "image_small",
    "image_large",
    "raw_data",
    "prices",
];

const POCKET_COLUMNS: &[&str] = &[
    "id",
    "name",
    "set_id",
    "number",
    "rarity",
    "card_type",
    "element",
    "hp",
    "stage",
    "retreat_cost",
    "weakness",
    "evolves_from",
    "packs",
    "image_url",
    "image_filename",
    "illustrator",
    "raw_data",
];

const SETS_COLUMNS: &[&str] = &[
    "id",
    "name",
    "series",
    "printed_total",
    "total",
    "release_date",
    "symbol_url",
    "logo_url",
];

const POCKET_SETS_COLUMNS: &[&str] = &["id", "name", "series", "release_date"];

const SPECIES_COLUMNS: &[&str] = &[
    "pokedex_number",
    "name",
    "region",
    "generation",
    "color",
    "shape",
    "genus",
    "encounter_location",
    "evolution_chain",
];

pub fn card_columns(table: CardTable) -> &'static [&'static str] {
    match table {
        CardTable::Tcg => TCG_COLUMNS,
        CardTable::Pocket => POCKET_COLUMNS,
    }
}

// ── Input description ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SnapshotPaths {
    pub tcg_cards: PathBuf,
    pub pocket_cards: PathBuf,
    pub sets: Option<PathBuf>,
    pub pocket_sets: Option<PathBuf>,
    pub pokemon_metadata: Option<PathBuf>,
    /// User-authored custom-card document (array of records with a table
    /// routing hint).
    pub custom_cards: Option<PathBuf>,
    /// Pre-existing card-id → annotation document, applied last.
    pub annotations: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub tcg_cards: usize,
    pub pocket_cards: usize,
    pub sets: usize,
    pub pocket_sets: usize,
    pub species: usize,
    pub custom_cards: usize,
    pub overlaid: usize,
    pub warnings: Vec<String>,
}

// ── Top-level load ───────────────────────────────────────────────────────

pub fn load_all(engine: &Engine, paths: &SnapshotPaths) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    let tcg_rows = read_records(&paths.tcg_cards, "tcg_cards", true, &mut report.warnings)?;
    let pocket_rows = read_records(&paths.pocket_cards, "pocket_cards", true, &mut report.warnings)?;

    engine.conn().execute_batch("BEGIN TRANSACTION")?;
    let result = (|| -> Result<()> {
        report.tcg_cards = insert_rows(engine, "tcg_cards", TCG_COLUMNS, &tcg_rows)?;
        report.pocket_cards = insert_rows(engine, "pocket_cards", POCKET_COLUMNS, &pocket_rows)?;

        for (path, table, columns, count) in [
            (&paths.sets, "sets", SETS_COLUMNS, &mut report.sets),
            (
                &paths.pocket_sets,
                "pocket_sets",
                POCKET_SETS_COLUMNS,
                &mut report.pocket_sets,
            ),
            (
                &paths.pokemon_metadata,
                "pokemon_metadata",
                SPECIES_COLUMNS,
                &mut report.species,
            ),
        ] {
            if let Some(path) = path {
                let rows = read_records(path, table, false, &mut report.warnings)?;
                *count = insert_rows(engine, table, columns, &rows)?;
            }
        }
        Ok(())
    })();
    match result {
        Ok(()) => engine.conn().execute_batch("COMMIT")?,
        Err(e) => {
            let _ = engine.conn().execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    if let Some(path) = &paths.custom_cards {
        let records = read_records(path, "custom_cards", false, &mut report.warnings)?;
        for record in &records {
            match insert_custom_card(engine, record) {
                Ok(_) => report.custom_cards += 1,
                Err(e) => report.warnings.push(format!("custom card skipped: {e}")),
            }
        }
    }

    if let Some(path) = &paths.annotations {
        report.overlaid = apply_annotation_overlay(engine, path, &mut report.warnings)?;
    }

    for warning in &report.warnings {
        eprintln!("[loader] {warning}");
    }
    Ok(report)
}

/// Read a JSON array-of-objects document. A missing or unreadable mandatory
/// snapshot is fatal; an optional one degrades to an empty row set.
fn read_records(
    path: &Path,
    name: &str,
    mandatory: bool,
    warnings: &mut Vec<String>,
) -> Result<Vec<Map<String, Value>>> {
    let degrade = |detail: String, warnings: &mut Vec<String>| -> Result<Vec<Map<String, Value>>> {
        if mandatory {
            Err(CatalogError::UpstreamFetch {
                name: name.to_string(),
                detail,
                mandatory,
            })
        } else {
            warnings.push(format!("{name}: {detail} (degraded to empty)"));
            Ok(Vec::new())
        }
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => return degrade(format!("read {}: {e}", path.display()), warnings),
    };
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => return degrade(format!("parse {}: {e}", path.display()), warnings),
    };
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()),
        _ => degrade("expected a JSON array of records".to_string(), warnings),
    }
}

/// Insert records taking only the table's known columns; snapshot rows keep
/// their full payload in raw_data anyway.
fn insert_rows(
    engine: &Engine,
    table: &str,
    columns: &[&str],
    rows: &[Map<String, Value>],
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    let mut stmt = engine.conn().prepare(&sql)?;
    let mut inserted = 0usize;
    for row in rows {
        let values: Vec<Option<String>> = columns
            .iter()
            .map(|col| row.get(*col).and_then(value_to_sql_text))
            .collect();
        stmt.execute(rusqlite::params_from_iter(values.iter()))?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Scalar columns take the JSON value's text; arrays and objects are stored
/// as their JSON serialization (the engine's JSON1 functions read them back).
fn value_to_sql_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

// ── Custom card insertion ────────────────────────────────────────────────

/// Insert one user-authored card record. The record must carry a `table`
/// routing hint; recognized fields map to columns, everything else is folded
/// into the annotation blob (schema-drift tolerance). Shared by startup
/// load, hydration replay, and the `add_card` API.
pub fn insert_custom_card(
    engine: &Engine,
    record: &Map<String, Value>,
) -> Result<(CardTable, String)> {
    let hint = record
        .get("table")
        .and_then(Value::as_str)
        .ok_or_else(|| CatalogError::validation("custom card record is missing a table hint"))?;
    let table = CardTable::from_hint(hint)
        .ok_or_else(|| CatalogError::validation(format!("unknown table hint '{hint}'")))?;

    let id = record
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CatalogError::validation("custom card record is missing an id"))?
        .to_string();
    if engine.has_row(table, &id)? {
        return Err(CatalogError::validation(format!(
            "card '{id}' already exists in {}",
            table.table_name()
        )));
    }

    let source = record
        .get("source")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Custom")
        .to_string();
    // A custom row must not masquerade as a native source.
    if CardTable::from_hint(&source).is_some() && !source.eq_ignore_ascii_case(table.source_label())
    {
        return Err(CatalogError::validation(format!(
            "custom source '{source}' conflicts with the routing hint '{hint}'"
        )));
    }

    let columns = card_columns(table);
    let mut insert_columns: Vec<&str> = vec!["is_custom", "custom_source"];
    let mut values: Vec<Option<String>> = vec![Some("1".into()), Some(source)];
    for col in columns {
        insert_columns.push(col);
        values.push(record.get(*col).and_then(value_to_sql_text));
    }

    // Everything not recognized as a column (or routing metadata) overflows
    // into annotations.
    let mut annotations = Annotations::new();
    if let Some(Value::Object(embedded)) = record.get("annotations") {
        for (key, value) in embedded {
            if !value.is_null() {
                annotations.insert(key.clone(), coerce_annotation_value(value));
            }
        }
    }
    for (key, value) in record {
        let known = key == "table"
            || key == "source"
            || key == "annotations"
            || columns.contains(&key.as_str());
        if !known && !value.is_null() {
            annotations.insert(key.clone(), coerce_annotation_value(value));
        }
    }

    let placeholders: Vec<String> = (1..=insert_columns.len()).map(|i| format!("?{i}")).collect();
    engine.conn().execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.table_name(),
            insert_columns.join(", "),
            placeholders.join(", ")
        ),
        rusqlite::params_from_iter(values.iter()),
    )?;

    if !annotations.is_empty() {
        engine.write_annotations(table, &id, &annotations)?;
    }
    Ok((table, id))
}

// ── Annotation overlay ───────────────────────────────────────────────────

/// Apply a card-id → annotation-map document on top of loaded rows. Overlay
/// keys win over anything already in the blob; unknown ids are skipped with
/// a warning.
fn apply_annotation_overlay(
    engine: &Engine,
    path: &Path,
    warnings: &mut Vec<String>,
) -> Result<usize> {
    let mut records = Vec::new();
    match read_records_object(path) {
        Ok(map) => records.extend(map),
        Err(e) => {
            warnings.push(format!("annotation overlay: {e} (skipped)"));
            return Ok(0);
        }
    }

    let mut applied = 0usize;
    for (card_id, value) in records {
        let Value::Object(overlay) = value else {
            warnings.push(format!("overlay for '{card_id}' is not an object, skipped"));
            continue;
        };
        let table = match engine.resolve(&card_id, None) {
            Ok(table) => table,
            Err(_) => {
                warnings.push(format!("overlay for unknown card '{card_id}', skipped"));
                continue;
            }
        };
        let mut merged = engine
            .annotations_blob(table, &card_id)?
            .unwrap_or_default();
        for (key, v) in &overlay {
            if v.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), coerce_annotation_value(v));
            }
        }
        engine.write_annotations(table, &card_id, &merged)?;
        applied += 1;
    }
    Ok(applied)
}

fn read_records_object(path: &Path) -> std::result::Result<Map<String, Value>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).map_err(|e| format!("parse {}: {e}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err("expected a JSON object keyed by card id".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixture_paths, temp_dir, write_json};
    use serde_json::json;

    #[test]
    fn loads_fixture_snapshots() {
        let dir = temp_dir("basic");
        let engine = Engine::new().unwrap();
        let report = load_all(&engine, &fixture_paths(&dir)).unwrap();
        assert_eq!(report.tcg_cards, 2);
        assert_eq!(report.pocket_cards, 1);
        assert_eq!(report.species, 1);

        let hp: String = engine
            .conn()
            .query_row("SELECT hp FROM pocket_cards WHERE id = 'A1-001'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(hp, "70");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_mandatory_snapshot_is_fatal() {
        let dir = temp_dir("mandatory");
        let mut paths = fixture_paths(&dir);
        paths.tcg_cards = dir.join("does_not_exist.json");
        let engine = Engine::new().unwrap();
        let err = load_all(&engine, &paths).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::UpstreamFetch { mandatory: true, .. }
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_optional_snapshot_degrades() {
        let dir = temp_dir("optional");
        let mut paths = fixture_paths(&dir);
        paths.pokemon_metadata = Some(dir.join("does_not_exist.json"));
        let engine = Engine::new().unwrap();
        let report = load_all(&engine, &paths).unwrap();
        assert_eq!(report.species, 0);
        assert!(!report.warnings.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn custom_card_folds_unknown_fields() {
        let engine = Engine::new().unwrap();
        let record = json!({
            "table": "tcg_cards",
            "id": "homebrew-1",
            "name": "Paper Dragon",
            "source": "Homebrew",
            "rarity": "Promo",
            "flavor_text": "made at the kitchen table",
            "sleeves": ["red", "blue"]
        });
        let Value::Object(record) = record else { unreachable!() };
        let (table, id) = insert_custom_card(&engine, &record).unwrap();
        assert_eq!(table, CardTable::Tcg);

        let map = engine.annotations_blob(table, &id).unwrap().unwrap();
        assert_eq!(
            map["flavor_text"].as_text(),
            Some("made at the kitchen table")
        );
        assert!(matches!(
            map["sleeves"],
            crate::types::AnnotationValue::List(_)
        ));
        // Recognized fields went to columns, not annotations.
        assert!(!map.contains_key("rarity"));

        // Same id, same table: rejected. Same id, other table: fine.
        assert!(matches!(
            insert_custom_card(&engine, &record),
            Err(CatalogError::Validation(_))
        ));
        let mut pocket_record = record.clone();
        pocket_record.insert("table".into(), json!("pocket_cards"));
        assert!(insert_custom_card(&engine, &pocket_record).is_ok());
    }

    #[test]
    fn overlay_applies_after_load() {
        let dir = temp_dir("overlay");
        let mut paths = fixture_paths(&dir);
        let overlay = json!({
            "base1-1": {"owned": true, "notes": "binder A"},
            "ghost-99": {"owned": true}
        });
        paths.annotations = Some(write_json(&dir, "annotations.json", &overlay));
        let engine = Engine::new().unwrap();
        let report = load_all(&engine, &paths).unwrap();
        assert_eq!(report.overlaid, 1);

        let map = engine
            .annotations_blob(CardTable::Tcg, "base1-1")
            .unwrap()
            .unwrap();
        assert_eq!(map["owned"].as_bool(), Some(true));
        assert!(report.warnings.iter().any(|w| w.contains("ghost-99")));
        std::fs::remove_dir_all(&dir).ok();
    }
}
