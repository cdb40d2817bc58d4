//! Client-local persistent key-value mirror of all mutable state.
//!
//! Four independent keyed collections, behind a trait so tests can swap in
//! an in-memory store. Writes here are never coordinated with the paired
//! engine write; a crash between the two self-heals on the next hydration.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Annotations,
    AttributeDefs,
    CustomCards,
    CustomSets,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Annotations => "annotations",
            Self::AttributeDefs => "attribute_defs",
            Self::CustomCards => "custom_cards",
            Self::CustomSets => "custom_sets",
        }
    }
}

pub trait DurableStore {
    fn get_all(&self, collection: Collection) -> Result<Vec<(String, Value)>>;
    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<()>;
    fn delete(&self, collection: Collection, key: &str) -> Result<()>;
}

// ── SQLite-backed store ──────────────────────────────────────────────────

const MIRROR_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS mirror (
    collection TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (collection, key)
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(MIRROR_SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}

impl DurableStore for SqliteStore {
    fn get_all(&self, collection: Collection) -> Result<Vec<(String, Value)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM mirror WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![collection.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, raw) = row?;
            match serde_json::from_str(&raw) {
                Ok(value) => out.push((key, value)),
                Err(e) => {
                    eprintln!(
                        "[cache] skipping corrupt {} record '{key}': {e}",
                        collection.as_str()
                    );
                }
            }
        }
        Ok(out)
    }

    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO mirror (collection, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, key) DO UPDATE
                SET value = excluded.value, updated_at = excluded.updated_at",
            params![collection.as_str(), key, raw, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM mirror WHERE collection = ?1 AND key = ?2",
            params![collection.as_str(), key],
        )?;
        Ok(())
    }
}

// ── In-memory store (tests, throwaway sessions) ──────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get_all(&self, collection: Collection) -> Result<Vec<(String, Value)>> {
        let records = self.records.lock().expect("store poisoned");
        Ok(records
            .iter()
            .filter(|((c, _), _)| c == collection.as_str())
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<()> {
        let mut records = self.records.lock().expect("store poisoned");
        records.insert(
            (collection.as_str().to_string(), key.to_string()),
            value.clone(),
        );
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        let mut records = self.records.lock().expect("store poisoned");
        records.remove(&(collection.as_str().to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn temp_store_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("cardvault_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("cache_{}_{name}.sqlite", std::process::id()))
    }

    #[test]
    fn sqlite_store_roundtrip() {
        let path = temp_store_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        let store = SqliteStore::open_or_create(&path).unwrap();

        store
            .put(Collection::Annotations, "base1-1", &json!({"owned": true}))
            .unwrap();
        store
            .put(Collection::Annotations, "base1-1", &json!({"owned": false}))
            .unwrap();
        store
            .put(Collection::CustomSets, "myset", &json!({"name": "Mine"}))
            .unwrap();

        let annotations = store.get_all(Collection::Annotations).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].1, json!({"owned": false}));

        // Collections are independent.
        assert_eq!(store.get_all(Collection::CustomCards).unwrap().len(), 0);

        store.delete(Collection::Annotations, "base1-1").unwrap();
        assert!(store.get_all(Collection::Annotations).unwrap().is_empty());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store
            .put(Collection::AttributeDefs, "grade", &json!({"key": "grade"}))
            .unwrap();
        let defs = store.get_all(Collection::AttributeDefs).unwrap();
        assert_eq!(defs.len(), 1);
        store.delete(Collection::AttributeDefs, "grade").unwrap();
        assert!(store.get_all(Collection::AttributeDefs).unwrap().is_empty());
    }
}
