//! # bean-queue: priority-partitioned workers for message-driven beans
//!
//! Every registered queue gets one background worker per priority. A worker
//! walks each message it tracks through a small state machine, runs the
//! queue's listener as a tokio task with bounded concurrency and forgets the
//! message once it is processed or failed.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bean_core::{BeanRegistry, BeanResult, InvocationContext};
//! use bean_queue::prelude::*;
//!
//! struct OrderListener;
//!
//! #[async_trait]
//! impl MessageListener for OrderListener {
//!     async fn on_message(&self, message: &Message, ctx: &InvocationContext) -> BeanResult<()> {
//!         tracing::info!(session = %ctx.session_id, "order {}", message.payload);
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> QueueResult<()> {
//! let beans: BeanRegistry<dyn MessageListener> = BeanRegistry::new();
//! beans.register("OrderBean", Arc::new(OrderListener));
//!
//! let manager = QueueManager::new(QueueConfig::default(), Arc::new(beans));
//! manager.register_queue(QueueDescriptor::new("orders", "OrderBean"));
//! manager.submit("orders", Priority::High, serde_json::json!({"sku": "A-1"}), "session-1")?;
//! manager.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod types;
pub mod worker;

pub use codec::json::JsonCodec;
pub use codec::{CodecRegistry, EnvelopeCodec, MessageEnvelope};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use job::{Job, JobHandle, JobOutcome, ListenerLocator, MessageListener};
pub use manager::{QueueDescriptor, QueueManager, QueueWorkerSet};
pub use types::{Message, MessageEvent, MessageId, MessageState, Priority};
pub use worker::{QueueWorker, ScanReport, Step, WorkerHandle, WorkerStats};

pub mod prelude {
    pub use crate::{
        Message, MessageEnvelope, MessageId, MessageListener, MessageState, Priority,
        QueueConfig, QueueDescriptor, QueueError, QueueManager, QueueResult,
    };

    pub use async_trait::async_trait;
}
