//! facematch-store — SQLite catalog for categories, people and face records.
//!
//! Nearest-neighbor ranking runs inside SQLite through a registered
//! `cosine_distance` scalar function.

pub mod schema;
mod sqlite;
pub mod vector;

pub use sqlite::SqliteCatalog;
