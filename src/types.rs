use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Sources and physical tables ──────────────────────────────────────────

/// One of the two fixed backing card tables. Custom rows live inside these
/// same tables (flagged `is_custom`), routed by the stored table hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardTable {
    Tcg,
    Pocket,
}

impl CardTable {
    /// Deterministic probe order shared by every path that resolves an id
    /// without a source hint.
    pub const PROBE_ORDER: [CardTable; 2] = [CardTable::Tcg, CardTable::Pocket];

    pub fn table_name(self) -> &'static str {
        match self {
            Self::Tcg => "tcg_cards",
            Self::Pocket => "pocket_cards",
        }
    }

    pub fn source_label(self) -> &'static str {
        match self {
            Self::Tcg => "TCG",
            Self::Pocket => "Pocket",
        }
    }

    /// Companion set-metadata table.
    pub fn sets_table_name(self) -> &'static str {
        match self {
            Self::Tcg => "sets",
            Self::Pocket => "pocket_sets",
        }
    }

    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "tcg" | "tcg_cards" => Some(Self::Tcg),
            "pocket" | "pocket_cards" => Some(Self::Pocket),
            _ => None,
        }
    }
}

impl std::fmt::Display for CardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

// ── Annotations ──────────────────────────────────────────────────────────

/// A single annotation value. Arrays are replaced wholesale on patch, never
/// deep-merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl AnnotationValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for AnnotationValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for AnnotationValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Full per-card annotation map. BTreeMap keeps serialization stable so a
/// re-read after export/hydrate is byte-identical.
pub type Annotations = BTreeMap<String, AnnotationValue>;

/// Merge-patch document: `None` (JSON null) deletes the key, any other value
/// replaces it, absent keys are untouched.
pub type AnnotationPatch = BTreeMap<String, Option<AnnotationValue>>;

// ── Cards ────────────────────────────────────────────────────────────────

/// Shared display-card view: the single projection every physical row is
/// mapped through, regardless of backing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    /// Source label: "TCG", "Pocket", or an open custom source name.
    pub source: String,
    pub table: CardTable,
    pub is_custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supertype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_small: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_large: Option<String>,
    /// Price fallback chain result; TCG source only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_price: Option<f64>,
    #[serde(default)]
    pub annotations: Annotations,
    /// Joined reference facts, present on full reads of non-custom TCG cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<SpeciesFacts>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardPage {
    pub cards: Vec<Card>,
    pub total: u64,
}

// ── Reference metadata ───────────────────────────────────────────────────

/// Immutable species facts keyed by pokedex number. Never mutated by the
/// core; only read to auto-populate annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesFacts {
    pub pokedex_number: i64,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub generation: Option<i64>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub genus: Option<String>,
    #[serde(default)]
    pub encounter_location: Option<String>,
    #[serde(default)]
    pub evolution_chain: Vec<String>,
}

// ── Sets ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
    /// Backing sets table; carried so exported custom sets rehydrate into
    /// the right table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<CardTable>,
}

// ── Attribute definitions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValueType {
    Text,
    Number,
    Boolean,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub key: String,
    pub label: String,
    pub value_type: AttrValueType,
    /// Required iff `value_type == Select`.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub default_value: Option<AnnotationValue>,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(default)]
    pub sort_order: i64,
}

// ── Query surface inputs ─────────────────────────────────────────────────

/// Filter set for `list_cards`. Field values are always bound as parameters;
/// the fields themselves are this closed struct, so no identifier ever comes
/// from user input.
#[derive(Debug, Clone, Default)]
pub struct CardFilters {
    /// None or empty string means "all sources" (best-effort union).
    pub source: Option<String>,
    /// Case-insensitive substring on name.
    pub name: Option<String>,
    pub supertype: Option<String>,
    pub rarity: Option<String>,
    pub set_id: Option<String>,
    /// Array containment on the JSON `types` column.
    pub card_type: Option<String>,
    pub owned: Option<bool>,
    pub hp_min: Option<i64>,
    pub hp_max: Option<i64>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    /// Joined-reference equality via pokedex lookup.
    pub region: Option<String>,
    pub generation: Option<i64>,
    /// Array containment on the promoted evolution_line column.
    pub evolution_line: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SortSpec {
    /// Validated against a per-source allow-list; mismatches fall back to
    /// the default sort instead of erroring.
    pub field: Option<String>,
    pub descending: bool,
}

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 250;

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Defensive parse: invalid input silently defaults, never rejects.
    pub fn parse_lenient(page: Option<&str>, page_size: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let page_size = page_size
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, page_size }
    }

    /// Widened to u64: page itself is unbounded, only page_size is capped.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

// ── Filter options (combo-box feed) ──────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SetOption {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FilterOptions {
    pub supertypes: Vec<String>,
    pub rarities: Vec<String>,
    pub card_types: Vec<String>,
    pub sets: Vec<SetOption>,
}

// ── Ad-hoc executor output ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementOutcome {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
        row_count: usize,
    },
    Ack {
        rows_affected: usize,
    },
}

// ── Export snapshot ──────────────────────────────────────────────────────

/// Full exportable state handed to the remote versioned-store collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogSnapshot {
    /// Flat card-id → annotation map across every physical table.
    pub annotations: BTreeMap<String, Annotations>,
    /// Complete custom-card records, promoted columns denormalized back into
    /// their original scalar/array shapes.
    pub custom_cards: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub custom_sets: Vec<CardSet>,
}

// ── Collection statistics ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Default)]
pub struct CollectionStats {
    pub total: u64,
    pub owned: u64,
    pub by_source: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_defaults_on_garbage() {
        let p = PageRequest::parse_lenient(Some("banana"), Some("-3"));
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);

        let p = PageRequest::parse_lenient(Some("0"), None);
        assert_eq!(p.page, 1);

        let p = PageRequest::parse_lenient(Some("3"), Some("9999"));
        assert_eq!(p.page, 3);
        assert_eq!(p.page_size, MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 500);
    }

    #[test]
    fn offset_survives_max_page() {
        let p = PageRequest::parse_lenient(Some("4294967295"), Some("250"));
        assert_eq!(p.page, u32::MAX);
        assert_eq!(p.offset(), u64::from(u32::MAX - 1) * 250);
    }

    #[test]
    fn annotation_value_untagged_roundtrip() {
        let v: AnnotationValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, AnnotationValue::Bool(true));
        let v: AnnotationValue = serde_json::from_str("\"mint\"").unwrap();
        assert_eq!(v, AnnotationValue::Text("mint".into()));
        let v: AnnotationValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(v, AnnotationValue::List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn patch_null_deserializes_as_none() {
        let patch: AnnotationPatch =
            serde_json::from_str(r#"{"owned": true, "notes": null}"#).unwrap();
        assert_eq!(patch["owned"], Some(AnnotationValue::Bool(true)));
        assert_eq!(patch["notes"], None);
    }

    #[test]
    fn table_hints_resolve() {
        assert_eq!(CardTable::from_hint("TCG"), Some(CardTable::Tcg));
        assert_eq!(CardTable::from_hint("pocket_cards"), Some(CardTable::Pocket));
        assert_eq!(CardTable::from_hint("Homebrew"), None);
    }
}
