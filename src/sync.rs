//! Engine → durable-cache reconciliation and versioned snapshot export.
//!
//! The engine is the live source of truth; after an ad-hoc write statement
//! the mirror may be stale, so `resync_after_statement` re-reads every
//! annotated row of the touched tables and reconciles the cache. Export
//! produces a self-contained snapshot document whose revision is a content
//! hash, used for compare-and-swap pushes to a remote versioned store.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::annotations::annotation_cache_record;
use crate::cache::{Collection, DurableStore};
use crate::engine::{annotation_value_to_json, Engine};
use crate::error::{CatalogError, Result};
use crate::loader::card_columns;
use crate::types::{Annotations, CardSet, CardTable, CatalogSnapshot};

// ── Post-statement resync ────────────────────────────────────────────────

/// Columns stored as JSON text; exported back as structured values.
const JSON_TEXT_COLUMNS: &[&str] = &["subtypes", "types", "packs", "raw_data", "prices"];

/// Heuristic scan of an executed statement: a table is considered touched
/// when the statement names both the table and the annotations column. Over-
/// matching is harmless (the resync is idempotent); under-matching only
/// happens for statements that alias the table name away.
pub fn tables_touched(statement: &str) -> Vec<CardTable> {
    let lowered = statement.to_lowercase();
    if !lowered.contains("annotations") {
        return Vec::new();
    }
    CardTable::PROBE_ORDER
        .into_iter()
        .filter(|t| lowered.contains(t.table_name()))
        .collect()
}

/// Re-mirror every annotated row of the touched tables and drop cache
/// entries whose engine row no longer carries annotations.
pub fn resync_after_statement(
    engine: &Engine,
    store: &dyn DurableStore,
    statement: &str,
) -> Result<Vec<CardTable>> {
    let touched = tables_touched(statement);
    for table in &touched {
        resync_table(engine, store, *table)?;
    }
    Ok(touched)
}

fn resync_table(engine: &Engine, store: &dyn DurableStore, table: CardTable) -> Result<()> {
    let rows = engine.annotated_rows(table)?;
    let mut live: BTreeSet<String> = BTreeSet::new();
    for (id, map) in &rows {
        live.insert(id.clone());
        store.put(Collection::Annotations, id, &annotation_cache_record(table, map))?;
    }
    // Stale entries: cached under this table (by tag, or by row membership
    // for records that predate the tag) but no longer annotated.
    for (key, value) in store.get_all(Collection::Annotations)? {
        let tagged = value
            .get("table")
            .and_then(Value::as_str)
            .and_then(CardTable::from_hint);
        let belongs = match tagged {
            Some(t) => t == table,
            None => engine.has_row(table, &key)?,
        };
        if belongs && !live.contains(&key) {
            store.delete(Collection::Annotations, &key)?;
        }
    }
    Ok(())
}

// ── Snapshot export ──────────────────────────────────────────────────────

pub fn export_snapshot(engine: &Engine) -> Result<CatalogSnapshot> {
    let mut snapshot = CatalogSnapshot::default();
    for table in CardTable::PROBE_ORDER {
        for (id, map) in engine.annotated_rows(table)? {
            snapshot.annotations.insert(id, map);
        }
        snapshot
            .custom_cards
            .extend(export_custom_cards(engine, table)?);
        snapshot
            .custom_sets
            .extend(export_custom_sets(engine, table)?);
    }
    Ok(snapshot)
}

/// Custom rows denormalized back to record shape: column values regain their
/// JSON structure, the annotation blob becomes an embedded object, and the
/// `table` routing hint makes the record self-describing.
fn export_custom_cards(
    engine: &Engine,
    table: CardTable,
) -> Result<Vec<Map<String, Value>>> {
    let columns = card_columns(table);
    let sql = format!(
        "SELECT custom_source, annotations, {} FROM {} WHERE is_custom = 1 ORDER BY id",
        columns.join(", "),
        table.table_name()
    );
    let mut stmt = engine.conn().prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::new();
        record.insert("table".into(), Value::from(table.table_name()));
        if let Some(source) = row.get::<_, Option<String>>(0)? {
            record.insert("source".into(), Value::from(source));
        }
        for (i, col) in columns.iter().enumerate() {
            if let Some(text) = row.get::<_, Option<String>>(i + 2)? {
                record.insert((*col).to_string(), column_value(col, text));
            }
        }
        let blob: Option<String> = row.get(1)?;
        let map = crate::engine::parse_annotations(blob.as_deref());
        if !map.is_empty() {
            record.insert("annotations".into(), annotations_to_json(&map));
        }
        out.push(record);
    }
    Ok(out)
}

fn export_custom_sets(engine: &Engine, table: CardTable) -> Result<Vec<CardSet>> {
    let sql = format!(
        "SELECT id, name, series, release_date FROM {} WHERE is_custom = 1 ORDER BY id",
        table.sets_table_name()
    );
    let mut stmt = engine.conn().prepare(&sql)?;
    let sets = stmt
        .query_map([], |row| {
            Ok(CardSet {
                id: row.get(0)?,
                name: row.get(1)?,
                series: row.get(2)?,
                release_date: row.get(3)?,
                is_custom: true,
                table: Some(table),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sets)
}

fn column_value(column: &str, text: String) -> Value {
    if JSON_TEXT_COLUMNS.contains(&column) {
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            return parsed;
        }
    }
    Value::String(text)
}

fn annotations_to_json(map: &Annotations) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), annotation_value_to_json(v)))
            .collect(),
    )
}

/// Content-addressed revision of a snapshot: the blake3 hash of its
/// canonical serialization. Identical state always hashes identically, so a
/// no-op push is detectable without a remote read.
pub fn snapshot_revision(snapshot: &CatalogSnapshot) -> Result<String> {
    let canonical = serde_json::to_string(snapshot)?;
    Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

// ── Remote versioned store ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub content: String,
    /// Opaque remote revision token (e.g. a commit SHA).
    pub revision: String,
}

#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Committed { revision: String },
    /// Compare-and-swap lost: someone else wrote since we read.
    Conflict { actual: String },
}

/// Versioned remote file store. Writes are compare-and-swap on the revision
/// observed at read time; `expected_revision: None` means "create".
pub trait RemoteStore {
    fn read(&self, path: &str) -> Result<Option<RemoteFile>>;
    fn write(
        &self,
        path: &str,
        content: &str,
        expected_revision: Option<&str>,
        message: &str,
    ) -> Result<WriteOutcome>;
}

/// Export the current state and push it to the remote path. Returns the new
/// remote revision; a lost compare-and-swap surfaces as a sync error and
/// leaves the remote untouched.
pub fn push_snapshot(
    engine: &Engine,
    remote: &dyn RemoteStore,
    path: &str,
    message: &str,
) -> Result<String> {
    let snapshot = export_snapshot(engine)?;
    let content = serde_json::to_string_pretty(&snapshot)?;
    let expected = remote
        .read(path)
        .map_err(|e| CatalogError::RemoteSync(format!("read {path}: {e}")))?
        .map(|f| f.revision);
    match remote.write(path, &content, expected.as_deref(), message) {
        Ok(WriteOutcome::Committed { revision }) => Ok(revision),
        Ok(WriteOutcome::Conflict { actual }) => Err(CatalogError::RemoteSync(format!(
            "push {path}: remote moved to revision {actual} since read; re-pull and retry"
        ))),
        Err(e) => Err(CatalogError::RemoteSync(format!("write {path}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::patch_annotations;
    use crate::cache::MemoryStore;
    use crate::loader::load_all;
    use crate::testutil::{fixture_paths, temp_dir};
    use crate::types::{AnnotationPatch, AnnotationValue};
    use std::cell::RefCell;

    fn loaded_engine(tag: &str) -> Engine {
        let dir = temp_dir(tag);
        let engine = Engine::new().unwrap();
        load_all(&engine, &fixture_paths(&dir)).unwrap();
        engine
    }

    #[test]
    fn touched_tables_require_table_and_column() {
        assert_eq!(
            tables_touched("UPDATE tcg_cards SET annotations = '{}'"),
            vec![CardTable::Tcg]
        );
        assert!(tables_touched("UPDATE tcg_cards SET rarity = 'Rare'").is_empty());
        assert!(tables_touched("SELECT annotations FROM elsewhere").is_empty());
        assert_eq!(
            tables_touched(
                "update pocket_cards set annotations = json_set(annotations, '$.owned', true)"
            ),
            vec![CardTable::Pocket]
        );
    }

    #[test]
    fn resync_adds_and_removes_cache_entries() {
        let engine = loaded_engine("sync-resync");
        let store = MemoryStore::new();

        engine
            .conn()
            .execute(
                "UPDATE tcg_cards SET annotations = '{\"notes\":\"graded\"}' WHERE id = 'base1-1'",
                [],
            )
            .unwrap();
        let touched = resync_after_statement(
            &engine,
            &store,
            "UPDATE tcg_cards SET annotations = '{\"notes\":\"graded\"}' WHERE id = 'base1-1'",
        )
        .unwrap();
        assert_eq!(touched, vec![CardTable::Tcg]);
        let entries = store.get_all(Collection::Annotations).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "base1-1");
        assert_eq!(entries[0].1["table"], "tcg_cards");

        // Clearing the blob via ad-hoc SQL drops the cache entry on resync.
        engine
            .conn()
            .execute("UPDATE tcg_cards SET annotations = '{}' WHERE id = 'base1-1'", [])
            .unwrap();
        resync_after_statement(&engine, &store, "update tcg_cards set annotations = '{}'").unwrap();
        assert!(store.get_all(Collection::Annotations).unwrap().is_empty());
    }

    #[test]
    fn export_includes_annotations_and_custom_rows() {
        let engine = loaded_engine("sync-export");
        let store = MemoryStore::new();
        let mut patch = AnnotationPatch::new();
        patch.insert("owned".into(), Some(AnnotationValue::Bool(true)));
        patch.insert("notes".into(), Some("first pull".into()));
        patch_annotations(&engine, &store, "base1-1", None, &patch).unwrap();

        let mut custom = Map::new();
        custom.insert("table".into(), Value::from("tcg"));
        custom.insert("id".into(), Value::from("proxy-1"));
        custom.insert("name".into(), Value::from("Proxy Dragon"));
        custom.insert("types".into(), serde_json::json!(["Dragon"]));
        crate::loader::insert_custom_card(&engine, &custom).unwrap();

        let snapshot = export_snapshot(&engine).unwrap();
        assert!(snapshot.annotations.contains_key("base1-1"));
        assert_eq!(
            snapshot.annotations["base1-1"]["owned"],
            AnnotationValue::Bool(true)
        );
        assert_eq!(snapshot.custom_cards.len(), 1);
        let record = &snapshot.custom_cards[0];
        assert_eq!(record["table"], "tcg_cards");
        assert_eq!(record["id"], "proxy-1");
        assert_eq!(record["source"], "Custom");
        // JSON-text column regains its array shape on export.
        assert_eq!(record["types"], serde_json::json!(["Dragon"]));
    }

    #[test]
    fn revision_is_stable_and_content_addressed() {
        let engine = loaded_engine("sync-revision");
        let store = MemoryStore::new();
        let a = snapshot_revision(&export_snapshot(&engine).unwrap()).unwrap();
        let b = snapshot_revision(&export_snapshot(&engine).unwrap()).unwrap();
        assert_eq!(a, b);

        let mut patch = AnnotationPatch::new();
        patch.insert("owned".into(), Some(AnnotationValue::Bool(true)));
        patch_annotations(&engine, &store, "base1-1", None, &patch).unwrap();
        let c = snapshot_revision(&export_snapshot(&engine).unwrap()).unwrap();
        assert_ne!(a, c);
    }

    /// In-memory remote used for push tests.
    struct FakeRemote {
        file: RefCell<Option<RemoteFile>>,
        reject_next: RefCell<Option<String>>,
    }

    impl FakeRemote {
        fn new() -> Self {
            Self {
                file: RefCell::new(None),
                reject_next: RefCell::new(None),
            }
        }
    }

    impl RemoteStore for FakeRemote {
        fn read(&self, _path: &str) -> Result<Option<RemoteFile>> {
            Ok(self.file.borrow().clone())
        }

        fn write(
            &self,
            _path: &str,
            content: &str,
            expected_revision: Option<&str>,
            _message: &str,
        ) -> Result<WriteOutcome> {
            if let Some(actual) = self.reject_next.borrow_mut().take() {
                return Ok(WriteOutcome::Conflict { actual });
            }
            let current = self.file.borrow().as_ref().map(|f| f.revision.clone());
            if current.as_deref() != expected_revision {
                return Ok(WriteOutcome::Conflict {
                    actual: current.unwrap_or_default(),
                });
            }
            let revision = blake3::hash(content.as_bytes()).to_hex().to_string();
            *self.file.borrow_mut() = Some(RemoteFile {
                content: content.to_string(),
                revision: revision.clone(),
            });
            Ok(WriteOutcome::Committed { revision })
        }
    }

    #[test]
    fn push_commits_then_surfaces_conflicts() {
        let engine = loaded_engine("sync-push");
        let remote = FakeRemote::new();
        let rev = push_snapshot(&engine, &remote, "vault/catalog.json", "sync").unwrap();
        assert!(!rev.is_empty());

        // Second push reads the revision it just wrote and commits again.
        let rev2 = push_snapshot(&engine, &remote, "vault/catalog.json", "sync").unwrap();
        assert_eq!(rev, rev2);

        *remote.reject_next.borrow_mut() = Some("abc123".into());
        let err = push_snapshot(&engine, &remote, "vault/catalog.json", "sync").unwrap_err();
        assert!(matches!(err, CatalogError::RemoteSync(_)));
        assert!(err.to_string().contains("abc123"));
    }
}
