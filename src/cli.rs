use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cardvault")]
#[command(about = "Unified trading-card catalog with annotations and a durable mirror", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Workspace directory (default: $CARDVAULT_HOME or ~/.cardvault)
    #[arg(long, global = true)]
    pub(crate) workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// List cards across sources with filters, sorting, and paging.
    List {
        /// Source: TCG, Pocket, a custom source label, or omitted for all
        #[arg(short, long)]
        source: Option<String>,
        /// Case-insensitive name substring
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        supertype: Option<String>,
        #[arg(long)]
        rarity: Option<String>,
        #[arg(long = "set")]
        set_id: Option<String>,
        /// Card type / element (array containment on TCG)
        #[arg(long = "type")]
        card_type: Option<String>,
        /// Only owned (or with --not-owned, only unowned) cards
        #[arg(long)]
        owned: bool,
        #[arg(long, conflicts_with = "owned")]
        not_owned: bool,
        #[arg(long)]
        hp_min: Option<i64>,
        #[arg(long)]
        hp_max: Option<i64>,
        #[arg(long)]
        price_min: Option<f64>,
        #[arg(long)]
        price_max: Option<f64>,
        /// Species region (joined reference metadata, TCG only)
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        generation: Option<i64>,
        /// Member of the promoted evolution_line annotation
        #[arg(long)]
        evolution_line: Option<String>,
        /// Sort field (name, id, number, rarity, set_id, supertype, hp, price)
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value = "1")]
        page: String,
        #[arg(long, default_value = "50")]
        page_size: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one card in full: merged annotations and species facts.
    Show {
        id: String,
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Patch a card's annotations: merge-patch semantics.
    Annotate {
        id: String,
        #[arg(short, long)]
        source: Option<String>,
        /// key=value assignment (repeatable); true/false become booleans,
        /// comma-separated values in [brackets] become lists
        #[arg(long = "set")]
        assignments: Vec<String>,
        /// Key to remove (repeatable)
        #[arg(long = "unset")]
        removals: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// List attribute definitions.
    Attrs {
        #[arg(long)]
        json: bool,
    },

    /// Create a custom attribute definition.
    AttrAdd {
        key: String,
        #[arg(long)]
        label: Option<String>,
        /// Value type: text, number, boolean, select
        #[arg(long = "type", default_value = "text")]
        value_type: String,
        /// Select option (repeatable, required for select)
        #[arg(long = "option")]
        options: Vec<String>,
    },

    /// Delete a custom attribute definition.
    AttrRm { key: String },

    /// Add a custom card from a JSON record file (or inline JSON).
    AddCard {
        /// Path to a JSON object with a "table" routing hint
        #[arg(long, conflicts_with = "inline")]
        file: Option<PathBuf>,
        /// Inline JSON object
        #[arg(long)]
        inline: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Delete custom cards by id.
    Delete { ids: Vec<String> },

    /// List sets, native and custom.
    Sets {
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Append a user-created set.
    AddSet {
        /// Target table: tcg or pocket
        #[arg(long, default_value = "tcg")]
        table: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        series: Option<String>,
        #[arg(long)]
        release_date: Option<String>,
    },

    /// Distinct filter values for building search UIs.
    Options {
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Export the full mutable state as a snapshot document.
    Export {
        /// Write the snapshot here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run an arbitrary SQL statement against the engine.
    Sql {
        statement: String,
        #[arg(long)]
        json: bool,
    },

    /// Collection statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },
}
