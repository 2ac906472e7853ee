pub mod metrics_defs;
pub mod project_service;
pub mod resolver;
pub mod types;

pub use resolver::{ResolveError, Resolver};
pub use types::{Dialect, NodeClass, ResourceBinding, ServiceKind};
