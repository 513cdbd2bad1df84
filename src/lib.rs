pub mod access;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod logger;
pub mod model;
pub mod operations;
pub mod query;
pub mod sanitize;
pub mod scope;
pub mod store;
pub mod types;

pub use access::{Access, AccessContext, ExcludedMap, ExclusionFilter, FieldFilter};
pub use config::{AppConfig, Options};
pub use envelope::{Envelope, Payload};
pub use errors::{DbError, OpError};
pub use model::{FieldKind, IdKind, ModelRegistry, ResourceModel, Visibility};
pub use operations::{ErrorHandler, LogErrorHandler, Operations, Request};
pub use scope::{ContextFilter, FieldScope, ScopedView, Unscoped};
pub use store::{MemoryStore, Store, UpdateOptions};
