use std::sync::Arc;

use bean_core::InvocationContext;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error};

use super::ListenerLocator;
use crate::{Message, MessageState};

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler returned successfully
    Processed,
    /// Handler failed, panicked or could not be resolved
    Failed(String),
}

impl JobOutcome {
    /// State the message moves to once the worker observes this outcome
    pub fn state(&self) -> MessageState {
        match self {
            Self::Processed => MessageState::Processed,
            Self::Failed(_) => MessageState::Failed,
        }
    }
}

/// One asynchronous execution of a listener's `on_message` for one message
pub struct Job {
    message: Arc<Message>,
    bean_type: String,
    locator: Arc<ListenerLocator>,
}

impl Job {
    pub fn new(message: Arc<Message>, bean_type: impl Into<String>, locator: Arc<ListenerLocator>) -> Self {
        Self {
            message,
            bean_type: bean_type.into(),
            locator,
        }
    }

    /// Spawn the job on the current tokio runtime.
    ///
    /// The returned handle is polled by the worker; nothing ever awaits it.
    pub fn spawn(self) -> JobHandle {
        let (completion_tx, completion_rx) = oneshot::channel();

        tokio::spawn(async move {
            let outcome = self.execute().await;
            let _ = completion_tx.send(outcome);
        });

        JobHandle {
            completion: completion_rx,
            outcome: None,
        }
    }

    /// Resolve the listener and run it; errors are turned into an outcome
    pub async fn execute(&self) -> JobOutcome {
        let ctx = InvocationContext::new(self.message.session());
        let message_id = &self.message.id;

        let listener = match self.locator.lookup(&self.bean_type, &ctx) {
            Ok(listener) => listener,
            Err(err) => {
                error!(%message_id, bean_type = %self.bean_type, "Bean lookup failed: {:#}", err);
                return JobOutcome::Failed(format!("{:#}", err));
            }
        };

        match listener.on_message(&self.message, &ctx).await {
            Ok(()) => {
                debug!(%message_id, request_id = %ctx.request_id, "Message handled");
                JobOutcome::Processed
            }
            Err(err) => {
                error!(%message_id, bean_type = %self.bean_type, "Message handler failed: {:#}", err);
                JobOutcome::Failed(format!("{:#}", err))
            }
        }
    }
}

/// Worker-side view of a running job
pub struct JobHandle {
    completion: oneshot::Receiver<JobOutcome>,
    outcome: Option<JobOutcome>,
}

impl JobHandle {
    /// Non-blocking check for completion; the outcome is cached once seen
    pub fn poll_outcome(&mut self) -> Option<&JobOutcome> {
        if self.outcome.is_none() {
            match self.completion.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    self.outcome = Some(JobOutcome::Failed(
                        "job ended without reporting an outcome".to_string(),
                    ));
                }
            }
        }
        self.outcome.as_ref()
    }

    /// Whether the job has signalled completion
    pub fn is_finished(&mut self) -> bool {
        self.poll_outcome().is_some()
    }
}
