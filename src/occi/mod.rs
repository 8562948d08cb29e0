//! Platform-neutral OCCI data model
//!
//! Resources, links, mixins and the shared capability model. Backends
//! translate between these types and vendor-native objects; nothing in this
//! module talks to a platform.

pub mod attribute;
pub mod category;
pub mod collection;
pub mod link;
pub mod model;
pub mod resource;
pub mod state;

pub use attribute::{AttributeValue, Attributes};
pub use category::{Action, ActionInstance, Category, Kind, Mixin};
pub use collection::Collection;
pub use link::{Link, LinkId, LinkKind, LinkTarget};
pub use model::{sanitize_term, template_term, Model};
pub use resource::{
    Resource, KIND_COMPUTE, KIND_IP_RESERVATION, KIND_NETWORK, KIND_SECURITY_GROUP, KIND_STORAGE,
};
pub use state::{ComputeState, NetworkState, ResourceState, StorageState};
