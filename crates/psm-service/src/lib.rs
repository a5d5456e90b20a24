//! RPC service for the registry store.
//!
//! A single worker task owns the [`psm_core::store::RegistryStore`] and a
//! [`psm_sync::SyncStrategy`]. Callers reach it through a [`ServiceHandle`],
//! in process or over HTTP via [`rpc_router`]. Auth, TLS, and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let service = Service::init(store, strategy, ServiceConfig::default());
//! let app = psm_service::rpc_router(service.handle());
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod rpc;
pub mod service;
mod worker;


pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use http::rpc_router;
pub use rpc::{Envelope, Reply, Request};
pub use service::{Service, ServiceHandle};
