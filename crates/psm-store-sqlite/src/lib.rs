//! SQLite backend for the plant-protection registry store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Each operation is a synchronous
//! function over a `rusqlite::Connection`; [`SqliteStore`] only moves them
//! onto that thread.

mod backup;
mod dataset;
mod encode;
mod lookup;
mod meta;
mod payload;
mod query;
mod schema;
mod snapshot;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use query::QueryBuilder;
pub use schema::TARGET_VERSION;
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
