//! Dataset synchronisation for the registry store.
//!
//! A [`SyncStrategy`] decides where a dataset comes from and how it is
//! fingerprinted; [`run_sync`] drives any strategy through change detection,
//! import and failure bookkeeping against a
//! [`psm_core::store::RegistryStore`].
//!
//! Two strategies ship with the crate:
//!
//! - [`ManifestSync`] downloads the pre-built SQLite dataset announced by a
//!   published manifest (the default).
//! - [`EndpointSync`] pages through the upstream registry API and imports the
//!   records in structured form. Intended for development.
//!
//! [`Strategy`] selects one of them from [`SyncConfig`].

#![allow(async_fn_in_trait)]

pub mod archive;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod manifest;
pub mod orchestrator;
pub mod progress;
pub mod source;
pub mod strategy;
pub mod transform;


pub use config::{SyncConfig, SyncMode};
pub use endpoints::EndpointSync;
pub use error::{Error, Result};
pub use http::HttpClient;
pub use manifest::ManifestSync;
pub use orchestrator::run_sync;
pub use progress::Progress;
pub use source::{DatasetSource, RegistryApi};
pub use strategy::{DatasetPayload, Preview, Staged, Strategy, SyncStrategy};
