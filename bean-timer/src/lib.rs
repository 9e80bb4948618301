//! # bean-timer: timers for timed objects
//!
//! Each timed-object type gets a [`TimerService`] that creates single-action,
//! interval and calendar timers. One [`TimerServiceExecutor`] per application
//! fires due timers, and a [`TimedObjectInvoker`] calls the bean's timeout
//! method. Calendar timers are evaluated by [`CalendarExpression`] against
//! a seven-field schedule.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bean_core::{BeanRegistry, BeanResult, InvocationContext};
//! use bean_timer::prelude::*;
//!
//! struct Reports;
//!
//! #[async_trait]
//! impl TimedObject for Reports {
//!     async fn timeout(&self, method: &str, timer: &Timer, _ctx: &InvocationContext) -> BeanResult<()> {
//!         tracing::info!(%method, info = %timer.info(), "report due");
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> TimerResult<()> {
//! let beans: BeanRegistry<dyn TimedObject> = BeanRegistry::new();
//! beans.register("Reports", Arc::new(Reports));
//!
//! let registry = TimerServiceRegistry::new(TimerConfig::default(), Arc::new(beans));
//! registry.register(
//!     TimedObjectDescriptor::new("Reports")
//!         .with_scheduled_method(ScheduledMethod::new("nightly", ScheduleExpression::parse("0 0 2 * * *")?)),
//! );
//! registry.start()?;
//!
//! let service = registry.lookup("Reports")?;
//! service.create_single_action_timer(std::time::Duration::from_secs(30), serde_json::json!("once"), false)?;
//! registry.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod calendar;
pub mod config;
pub mod error;
pub mod executor;
pub mod invoker;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod timer;
pub mod types;

pub use builder::TimerBuilder;
pub use calendar::CalendarExpression;
pub use config::{TimerConfig, DEFAULT_TICK_INTERVAL};
pub use error::{TimerError, TimerResult};
pub use executor::{ExecutorHandle, TimerServiceExecutor, TimerTask};
pub use invoker::{
    ScheduledMethod, TimedObject, TimedObjectDescriptor, TimedObjectInvoker, TimedObjectLocator,
    DEFAULT_TIMEOUT_METHOD,
};
pub use registry::TimerServiceRegistry;
pub use schedule::ScheduleExpression;
pub use service::TimerService;
pub use timer::{Recurrence, Timer};
pub use types::{TaskId, TimerId, TimerState};

pub mod prelude {
    pub use crate::{
        ScheduleExpression, ScheduledMethod, TimedObject, TimedObjectDescriptor, Timer,
        TimerConfig, TimerError, TimerResult, TimerService, TimerServiceRegistry, TimerState,
    };

    pub use async_trait::async_trait;
}
