//! OCCI Bridge - Cloud Platform Backend Layer
//!
//! Exposes heterogeneous cloud platforms (OpenNebula, EC2, NOW, and an
//! in-memory dummy) behind one platform-neutral OCCI resource model.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          REST Surface                            │
//! │              (model, resources, links, actions)                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                        Backend Proxy                             │
//! │            (facade resolution by resource kind term)             │
//! ├──────────────────┬──────────────────┬────────────────────────────┤
//! │  Compute Facade  │  Network Facade  │      Storage Facade        │
//! │  (+ link mgmt)   │                  │                            │
//! ├──────────────────┴──────────────────┴────────────────────────────┤
//! │                      Platform Clients                            │
//! │  ┌─────────────┐ ┌─────────────┐ ┌──────────┐ ┌──────────────┐   │
//! │  │ OpenNebula  │ │     EC2     │ │   NOW    │ │    Dummy     │   │
//! │  │  (XML-RPC)  │ │ (Query API) │ │ (REST)   │ │  (fixtures)  │   │
//! │  └─────────────┘ └─────────────┘ └──────────┘ └──────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`occi`]: Platform-neutral resources, links, mixins and the model
//! - [`backend`]: Facade contracts, registry, and the platform families
//! - [`server`]: Axum REST surface over one backend family
//! - [`store`]: Shared key-value store for backend bookkeeping
//! - [`template`]: Provisioning template rendering
//! - [`config`]: Bridge and per-backend configuration
//! - [`error`]: The error taxonomy

pub mod backend;
pub mod config;
pub mod error;
pub mod occi;
pub mod server;
pub mod store;
pub mod template;

// Re-export commonly used types
pub use backend::{
    BackendFactory, BackendProxy, Capabilities, ComputeBackend, FacadeRef, ModelExtender,
    NetworkBackend, ResourceBackend, StorageBackend,
};

pub use config::BridgeConfig;

pub use error::{Error, Result};

pub use occi::{
    ActionInstance, Attributes, Collection, Link, LinkId, LinkKind, Model, Resource,
};

pub use store::{KeyValueStore, KeyValueStoreRef, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
