//! Merge-patch annotation store and attribute definitions.
//!
//! Patch semantics: a `null` value removes the key, any other value replaces
//! it wholesale, absent keys are untouched. Every write lands in the blob
//! (source of truth) and in the promoted typed columns (read optimization),
//! then mirrors into the Durable Cache. A failed mirror write is logged and
//! swallowed: the engine stays authoritative for the session.

use rusqlite::params;
use serde_json::{json, Value};

use crate::cache::{Collection, DurableStore};
use crate::engine::Engine;
use crate::error::{CatalogError, Result};
use crate::types::{
    Annotations, AnnotationValue, AttrValueType, AttributeDefinition, CardTable, SpeciesFacts,
};

// ── Annotation read/write ────────────────────────────────────────────────

pub fn fetch_annotations(engine: &Engine, id: &str, source: Option<&str>) -> Result<Annotations> {
    let table = engine.resolve(id, source)?;
    engine
        .annotations_blob(table, id)?
        .ok_or_else(|| CatalogError::not_found(format!("card '{id}'")))
}

pub fn patch_annotations(
    engine: &Engine,
    store: &dyn DurableStore,
    id: &str,
    source: Option<&str>,
    patch: &crate::types::AnnotationPatch,
) -> Result<Annotations> {
    let table = engine.resolve(id, source)?;
    let mut merged = engine
        .annotations_blob(table, id)?
        .ok_or_else(|| CatalogError::not_found(format!("card '{id}'")))?;

    for (key, value) in patch {
        match value {
            None => {
                merged.remove(key);
            }
            Some(v) => {
                merged.insert(key.clone(), v.clone());
            }
        }
    }

    engine.write_annotations(table, id, &merged)?;
    mirror_annotations(store, table, id, &merged);
    Ok(merged)
}

/// Write-through mirror of one card's annotation map. Failures are logged,
/// never surfaced: the next hydration or resync repairs the mirror.
pub fn mirror_annotations(store: &dyn DurableStore, table: CardTable, id: &str, map: &Annotations) {
    let result = if map.is_empty() {
        store.delete(Collection::Annotations, id)
    } else {
        store.put(Collection::Annotations, id, &annotation_cache_record(table, map))
    };
    if let Err(e) = result {
        eprintln!("[cache] annotation mirror write failed for '{id}': {e}");
    }
}

pub fn annotation_cache_record(table: CardTable, map: &Annotations) -> Value {
    json!({
        "table": table.table_name(),
        "annotations": map,
    })
}

// ── Auto-population ──────────────────────────────────────────────────────

/// Fill derived annotation keys that are still unset, invoked on full-card
/// fetch only. Idempotent: once every candidate key is present, repeated
/// fetches perform zero writes.
pub fn populate_derived(
    engine: &Engine,
    store: &dyn DurableStore,
    table: CardTable,
    id: &str,
    is_custom: bool,
    species: Option<&SpeciesFacts>,
    current: &mut Annotations,
) -> Result<bool> {
    let mut additions = Annotations::new();
    if !current.contains_key("unique_id") {
        additions.insert("unique_id".into(), AnnotationValue::Text(id.to_string()));
    }
    if !is_custom {
        if let Some(species) = species {
            if !current.contains_key("evolution_line") && !species.evolution_chain.is_empty() {
                additions.insert(
                    "evolution_line".into(),
                    AnnotationValue::List(species.evolution_chain.clone()),
                );
            }
            let derived_text = [
                ("color", species.color.as_ref()),
                ("shape", species.shape.as_ref()),
                ("location", species.encounter_location.as_ref()),
            ];
            for (key, value) in derived_text {
                if !current.contains_key(key) {
                    if let Some(value) = value.filter(|v| !v.is_empty()) {
                        additions.insert(key.into(), AnnotationValue::Text(value.clone()));
                    }
                }
            }
        }
    }

    if additions.is_empty() {
        return Ok(false);
    }
    current.append(&mut additions);
    engine.write_annotations(table, id, current)?;
    mirror_annotations(store, table, id, current);
    Ok(true)
}

// ── Attribute definitions ────────────────────────────────────────────────

struct BuiltinDef {
    key: &'static str,
    label: &'static str,
    value_type: AttrValueType,
    options: &'static [&'static str],
}

const BUILTIN_DEFS: &[BuiltinDef] = &[
    BuiltinDef {
        key: "owned",
        label: "Owned",
        value_type: AttrValueType::Boolean,
        options: &[],
    },
    BuiltinDef {
        key: "quantity",
        label: "Quantity",
        value_type: AttrValueType::Number,
        options: &[],
    },
    BuiltinDef {
        key: "condition",
        label: "Condition",
        value_type: AttrValueType::Select,
        options: &["Mint", "Near Mint", "Lightly Played", "Played", "Damaged"],
    },
    BuiltinDef {
        key: "location",
        label: "Location",
        value_type: AttrValueType::Text,
        options: &[],
    },
    BuiltinDef {
        key: "notes",
        label: "Notes",
        value_type: AttrValueType::Text,
        options: &[],
    },
];

pub fn builtin_attr_keys() -> impl Iterator<Item = &'static str> {
    BUILTIN_DEFS.iter().map(|d| d.key)
}

/// Seed the fixed built-in definitions. Runs on every startup; already
/// seeded keys are left alone.
pub fn seed_builtin_defs(engine: &Engine) -> Result<()> {
    for (i, def) in BUILTIN_DEFS.iter().enumerate() {
        engine.conn().execute(
            "INSERT OR IGNORE INTO attribute_defs
                (key, label, value_type, options, default_value, is_builtin, sort_order)
             VALUES (?1, ?2, ?3, ?4, NULL, 1, ?5)",
            params![
                def.key,
                def.label,
                value_type_str(def.value_type),
                serde_json::to_string(def.options)?,
                (i + 1) as i64,
            ],
        )?;
    }
    Ok(())
}

pub fn list_attribute_definitions(engine: &Engine) -> Result<Vec<AttributeDefinition>> {
    let mut stmt = engine.conn().prepare(
        "SELECT key, label, value_type, options, default_value, is_builtin, sort_order
         FROM attribute_defs ORDER BY sort_order, key",
    )?;
    let rows = stmt.query_map([], row_to_def)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn create_attribute_definition(
    engine: &Engine,
    store: &dyn DurableStore,
    def: &AttributeDefinition,
) -> Result<AttributeDefinition> {
    if !is_valid_attr_key(&def.key) {
        return Err(CatalogError::validation(format!(
            "invalid attribute key '{}' (expected [a-z0-9_]+)",
            def.key
        )));
    }
    // Duplicate keys always report "already exists", whatever the type.
    let exists: i64 = engine.conn().query_row(
        "SELECT COUNT(*) FROM attribute_defs WHERE key = ?1",
        params![def.key],
        |row| row.get(0),
    )?;
    if exists > 0 {
        return Err(CatalogError::validation(format!(
            "attribute '{}' already exists",
            def.key
        )));
    }
    if def.value_type == AttrValueType::Select && def.options.is_empty() {
        return Err(CatalogError::validation(
            "select attributes require at least one option",
        ));
    }

    let sort_order: i64 = engine.conn().query_row(
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM attribute_defs",
        [],
        |row| row.get(0),
    )?;
    let created = AttributeDefinition {
        key: def.key.clone(),
        label: if def.label.is_empty() {
            def.key.clone()
        } else {
            def.label.clone()
        },
        value_type: def.value_type,
        options: def.options.clone(),
        default_value: def.default_value.clone(),
        is_builtin: false,
        sort_order,
    };

    engine.conn().execute(
        "INSERT INTO attribute_defs
            (key, label, value_type, options, default_value, is_builtin, sort_order)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            created.key,
            created.label,
            value_type_str(created.value_type),
            serde_json::to_string(&created.options)?,
            created
                .default_value
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            created.sort_order,
        ],
    )?;

    if let Err(e) = store.put(
        Collection::AttributeDefs,
        &created.key,
        &serde_json::to_value(&created)?,
    ) {
        eprintln!(
            "[cache] attribute mirror write failed for '{}': {e}",
            created.key
        );
    }
    Ok(created)
}

/// Replay one cached definition at hydration time, keeping its stored sort
/// order. Built-in key collisions and already-present keys are skipped, not
/// errors: the seeded builtins always win.
pub fn restore_attribute_definition(engine: &Engine, def: &AttributeDefinition) -> Result<bool> {
    if builtin_attr_keys().any(|k| k == def.key) {
        return Ok(false);
    }
    let inserted = engine.conn().execute(
        "INSERT OR IGNORE INTO attribute_defs
            (key, label, value_type, options, default_value, is_builtin, sort_order)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            def.key,
            def.label,
            value_type_str(def.value_type),
            serde_json::to_string(&def.options)?,
            def.default_value
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            def.sort_order,
        ],
    )?;
    Ok(inserted > 0)
}

pub fn delete_attribute_definition(
    engine: &Engine,
    store: &dyn DurableStore,
    key: &str,
) -> Result<()> {
    let row: Option<bool> = match engine.conn().query_row(
        "SELECT is_builtin FROM attribute_defs WHERE key = ?1",
        params![key],
        |row| row.get::<_, i64>(0),
    ) {
        Ok(v) => Some(v != 0),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };
    match row {
        None => Err(CatalogError::validation(format!(
            "unknown attribute key '{key}'"
        ))),
        Some(true) => Err(CatalogError::validation(format!(
            "attribute '{key}' is built-in and cannot be deleted"
        ))),
        Some(false) => {
            engine
                .conn()
                .execute("DELETE FROM attribute_defs WHERE key = ?1", params![key])?;
            if let Err(e) = store.delete(Collection::AttributeDefs, key) {
                eprintln!("[cache] attribute mirror delete failed for '{key}': {e}");
            }
            Ok(())
        }
    }
}

pub fn is_valid_attr_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn value_type_str(vt: AttrValueType) -> &'static str {
    match vt {
        AttrValueType::Text => "text",
        AttrValueType::Number => "number",
        AttrValueType::Boolean => "boolean",
        AttrValueType::Select => "select",
    }
}

fn value_type_from_str(s: &str) -> AttrValueType {
    match s {
        "number" => AttrValueType::Number,
        "boolean" => AttrValueType::Boolean,
        "select" => AttrValueType::Select,
        _ => AttrValueType::Text,
    }
}

fn row_to_def(row: &rusqlite::Row) -> std::result::Result<AttributeDefinition, rusqlite::Error> {
    let options_json: Option<String> = row.get(3)?;
    let default_json: Option<String> = row.get(4)?;
    Ok(AttributeDefinition {
        key: row.get(0)?,
        label: row.get(1)?,
        value_type: value_type_from_str(&row.get::<_, String>(2)?),
        options: options_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        default_value: default_json.and_then(|j| serde_json::from_str(&j).ok()),
        is_builtin: row.get::<_, i64>(5)? != 0,
        sort_order: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::types::AnnotationPatch;

    fn engine_with_card(id: &str) -> Engine {
        let engine = Engine::new().unwrap();
        engine
            .conn()
            .execute(
                "INSERT INTO tcg_cards (id, name) VALUES (?1, 'Card')",
                params![id],
            )
            .unwrap();
        engine
    }

    fn patch_of(pairs: &[(&str, Option<AnnotationValue>)]) -> AnnotationPatch {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_patch_laws() {
        let engine = engine_with_card("c1");
        let store = MemoryStore::new();

        let map = patch_annotations(
            &engine,
            &store,
            "c1",
            None,
            &patch_of(&[("a", Some("1".into())), ("b", Some("2".into()))]),
        )
        .unwrap();
        assert_eq!(map.len(), 2);

        // null deletes, siblings untouched
        let map = patch_annotations(
            &engine,
            &store,
            "c1",
            None,
            &patch_of(&[("a", None)]),
        )
        .unwrap();
        assert!(!map.contains_key("a"));
        assert_eq!(map["b"].as_text(), Some("2"));

        // arrays replaced wholesale
        patch_annotations(
            &engine,
            &store,
            "c1",
            None,
            &patch_of(&[(
                "tags",
                Some(AnnotationValue::List(vec!["x".into(), "y".into()])),
            )]),
        )
        .unwrap();
        let map = patch_annotations(
            &engine,
            &store,
            "c1",
            None,
            &patch_of(&[("tags", Some(AnnotationValue::List(vec!["z".into()])))]),
        )
        .unwrap();
        assert_eq!(map["tags"], AnnotationValue::List(vec!["z".into()]));
    }

    #[test]
    fn patch_mirrors_to_cache() {
        let engine = engine_with_card("c2");
        let store = MemoryStore::new();
        patch_annotations(
            &engine,
            &store,
            "c2",
            None,
            &patch_of(&[("owned", Some(true.into()))]),
        )
        .unwrap();
        let mirrored = store.get_all(Collection::Annotations).unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].0, "c2");
        assert_eq!(mirrored[0].1["table"], "tcg_cards");

        // Clearing the last key removes the mirror entry.
        patch_annotations(&engine, &store, "c2", None, &patch_of(&[("owned", None)])).unwrap();
        assert!(store.get_all(Collection::Annotations).unwrap().is_empty());
    }

    #[test]
    fn patch_unknown_card_is_not_found() {
        let engine = Engine::new().unwrap();
        let store = MemoryStore::new();
        assert!(matches!(
            patch_annotations(&engine, &store, "nope", None, &AnnotationPatch::new()),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn populate_derived_is_idempotent() {
        let engine = engine_with_card("c3");
        let store = MemoryStore::new();
        let species = SpeciesFacts {
            pokedex_number: 65,
            name: "alakazam".into(),
            region: Some("Kanto".into()),
            generation: Some(1),
            color: Some("brown".into()),
            shape: Some("upright".into()),
            genus: None,
            encounter_location: Some("Cerulean Cave".into()),
            evolution_chain: vec!["abra".into(), "kadabra".into(), "alakazam".into()],
        };

        let mut map = fetch_annotations(&engine, "c3", None).unwrap();
        let wrote = populate_derived(
            &engine,
            &store,
            CardTable::Tcg,
            "c3",
            false,
            Some(&species),
            &mut map,
        )
        .unwrap();
        assert!(wrote);
        assert_eq!(map["unique_id"].as_text(), Some("c3"));
        assert_eq!(map["color"].as_text(), Some("brown"));
        assert_eq!(map["location"].as_text(), Some("Cerulean Cave"));

        let mut second = fetch_annotations(&engine, "c3", None).unwrap();
        let wrote = populate_derived(
            &engine,
            &store,
            CardTable::Tcg,
            "c3",
            false,
            Some(&species),
            &mut second,
        )
        .unwrap();
        assert!(!wrote);
        assert_eq!(map, second);
    }

    #[test]
    fn populate_derived_custom_gets_unique_id_only() {
        let engine = engine_with_card("home-1");
        let store = MemoryStore::new();
        let mut map = Annotations::new();
        populate_derived(&engine, &store, CardTable::Tcg, "home-1", true, None, &mut map).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["unique_id"].as_text(), Some("home-1"));
    }

    #[test]
    fn attr_key_validation() {
        let engine = Engine::new().unwrap();
        let store = MemoryStore::new();
        seed_builtin_defs(&engine).unwrap();

        let bad = AttributeDefinition {
            key: "Bad Key!".into(),
            label: "Bad".into(),
            value_type: AttrValueType::Text,
            options: vec![],
            default_value: None,
            is_builtin: false,
            sort_order: 0,
        };
        assert!(matches!(
            create_attribute_definition(&engine, &store, &bad),
            Err(CatalogError::Validation(_))
        ));

        let dup = AttributeDefinition { key: "owned".into(), ..bad.clone() };
        let err = create_attribute_definition(&engine, &store, &dup).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Duplicate wins over the select-options check.
        let dup_select = AttributeDefinition {
            key: "condition".into(),
            value_type: AttrValueType::Select,
            options: vec![],
            ..bad
        };
        let err = create_attribute_definition(&engine, &store, &dup_select).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn builtin_protection_and_custom_delete() {
        let engine = Engine::new().unwrap();
        let store = MemoryStore::new();
        seed_builtin_defs(&engine).unwrap();

        assert!(matches!(
            delete_attribute_definition(&engine, &store, "owned"),
            Err(CatalogError::Validation(_))
        ));
        assert!(matches!(
            delete_attribute_definition(&engine, &store, "never_was"),
            Err(CatalogError::Validation(_))
        ));

        let def = AttributeDefinition {
            key: "grade".into(),
            label: "Grade".into(),
            value_type: AttrValueType::Select,
            options: vec!["PSA 9".into(), "PSA 10".into()],
            default_value: None,
            is_builtin: false,
            sort_order: 0,
        };
        let created = create_attribute_definition(&engine, &store, &def).unwrap();
        assert!(created.sort_order > 5); // after the seeded builtins
        assert_eq!(store.get_all(Collection::AttributeDefs).unwrap().len(), 1);

        delete_attribute_definition(&engine, &store, "grade").unwrap();
        assert!(store.get_all(Collection::AttributeDefs).unwrap().is_empty());
        assert!(list_attribute_definitions(&engine)
            .unwrap()
            .iter()
            .all(|d| d.key != "grade"));
    }

    #[test]
    fn select_requires_options() {
        let engine = Engine::new().unwrap();
        let store = MemoryStore::new();
        let def = AttributeDefinition {
            key: "slot".into(),
            label: "Slot".into(),
            value_type: AttrValueType::Select,
            options: vec![],
            default_value: None,
            is_builtin: false,
            sort_order: 0,
        };
        assert!(matches!(
            create_attribute_definition(&engine, &store, &def),
            Err(CatalogError::Validation(_))
        ));
    }
}
