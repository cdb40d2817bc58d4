//! Shared test fixtures: small snapshot documents written to temp dirs.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::loader::SnapshotPaths;

pub(crate) fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("cardvault_test")
        .join(format!("{}_{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub(crate) fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

/// Two TCG cards, one Pocket card, one species row. Enough to exercise
/// resolution order, the species join, and the price fallback chain.
pub(crate) fn fixture_paths(dir: &Path) -> SnapshotPaths {
    let tcg = json!([
        {
            "id": "base1-1", "name": "Alakazam", "supertype": "Pokémon",
            "subtypes": ["Stage 2"], "hp": "80", "types": ["Psychic"],
            "rarity": "Rare Holo", "set_id": "base1", "set_name": "Base",
            "set_series": "Base", "number": "1",
            "image_small": "https://img/base1-1.png",
            "raw_data": {"nationalPokedexNumbers": [65]},
            "prices": {"tcgplayer": {"prices": {"holofoil": {"market": 45.0}}}}
        },
        {
            "id": "base1-4", "name": "Charizard", "supertype": "Pokémon",
            "subtypes": ["Stage 2"], "hp": "120", "types": ["Fire"],
            "rarity": "Rare Holo", "set_id": "base1", "set_name": "Base",
            "set_series": "Base", "number": "4",
            "raw_data": {"nationalPokedexNumbers": [6]},
            "prices": {"cardmarket": {"prices": {"trendPrice": 320.5}}}
        }
    ]);
    let pocket = json!([
        {
            "id": "A1-001", "name": "Bulbasaur", "set_id": "A1", "number": "001",
            "rarity": "C", "card_type": "Pokémon", "element": "Grass",
            "hp": 70, "stage": "Basic", "packs": ["Mewtwo"]
        }
    ]);
    let species = json!([
        {
            "pokedex_number": 65, "name": "alakazam", "region": "Kanto",
            "generation": 1, "color": "brown", "shape": "upright",
            "encounter_location": "Cerulean Cave",
            "evolution_chain": ["abra", "kadabra", "alakazam"]
        }
    ]);
    SnapshotPaths {
        tcg_cards: write_json(dir, "cards.json", &tcg),
        pocket_cards: write_json(dir, "pocket_cards.json", &pocket),
        sets: None,
        pocket_sets: None,
        pokemon_metadata: Some(write_json(dir, "pokemon_metadata.json", &species)),
        custom_cards: None,
        annotations: None,
    }
}
