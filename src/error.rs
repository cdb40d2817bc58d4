use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Failure taxonomy for the catalog core.
///
/// Invariant violations fail fast at the API boundary; the only silent
/// coercion anywhere is pagination/sort input, which defaults instead of
/// erroring (query ergonomics over strictness).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    /// A startup input was missing or unreadable. `mandatory` decides whether
    /// startup aborts or degrades to an empty table.
    #[error("upstream fetch failed for {name}: {detail}")]
    UpstreamFetch {
        name: String,
        detail: String,
        mandatory: bool,
    },

    /// Ad-hoc statement failure, propagated verbatim from the engine.
    #[error("query failed: {0}")]
    Query(String),

    /// Remote versioned-store write failed after the local state was saved.
    /// Partial success: nothing is rolled back locally.
    #[error("remote sync failed: {0}")]
    RemoteSync(String),

    #[error("engine error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
