//! Core types and trait definitions for the plant-protection registry store.
//!
//! This crate is free of HTTP and database dependencies. The store, sync and
//! service crates all depend on it.

// Native `async fn` in traits; the returned futures carry explicit `Send`
// bounds where it matters.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod lookup;
pub mod payload;
pub mod query;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
