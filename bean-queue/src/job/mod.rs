pub mod handle;

pub use handle::{Job, JobHandle, JobOutcome};

use async_trait::async_trait;
use bean_core::{BeanLocator, BeanResult, InvocationContext};

use crate::Message;

/// Trait implemented by message-driven beans
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Handle one message; an error marks the message as failed
    async fn on_message(&self, message: &Message, ctx: &InvocationContext) -> BeanResult<()>;
}

/// Bean lookup used by jobs to resolve the listener of a queue
pub type ListenerLocator = dyn BeanLocator<dyn MessageListener>;
