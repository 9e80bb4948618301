//! bean-core: shared building blocks for the bean runtime.
//!
//! The queue and timer engines depend on this crate for structured errors,
//! configuration, the explicit invocation context and bean lookup.

pub mod config;
pub mod context;
pub mod errors;
pub mod registry;
pub mod telemetry;

pub use config::{BeanConfig, ConfigSnapshot};
pub use context::{InvocationContext, SessionId};
pub use errors::{BeanError, BeanResult, ErrorKind};
pub use registry::{BeanLocator, BeanRegistry};
pub use telemetry::{init_tracing, LogFormat};
