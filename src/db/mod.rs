//! Database layer for hn-dl
//!
//! Handles SQLite persistence for items and their child references.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by concern:
//! - [`migrations`]: connection setup and schema bootstrap
//! - [`items`]: the insert statements used by the writer, plus read helpers
//!
//! Schema:
//!
//! ```text
//! items(id PK, deleted, type, by, time, text, dead, parent, poll, url, score, title, parts, descendants)
//! kids(item -> items.id, kid, display_order)
//! ```

use sqlx::sqlite::SqlitePool;

mod items;
mod migrations;

pub use items::{decode_parts, encode_parts};

/// Database handle for hn-dl
///
/// Reads go through the shared pool. Writes go through a single dedicated
/// connection owned by [`ItemWriter`](crate::writer::ItemWriter).
pub struct Database {
    pool: SqlitePool,
}
