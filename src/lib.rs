//! cardvault — a unified trading-card catalog over immutable source
//! snapshots, with merge-patch annotations, a durable key-value mirror that
//! survives restarts, and content-addressed snapshot export for a remote
//! versioned store.
//!
//! The [`catalog::Catalog`] context object is the entry point: it owns the
//! in-memory SQLite engine and the durable mirror, and exposes the whole
//! query/annotation surface.

pub mod adhoc;
pub mod annotations;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod sync;
pub mod types;

#[cfg(test)]
mod testutil;

pub use catalog::Catalog;
pub use error::{CatalogError, Result};
