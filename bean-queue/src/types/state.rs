use serde::{Deserialize, Serialize};

/// Message lifecycle as driven by a queue worker.
///
/// ```text
/// Active -> ToProcess -> InProgress -> Processed
///               |            |
///               +--> Failed <+        Unknown -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Just attached, not yet looked at by the worker
    Active,
    /// Waiting for a free job slot
    ToProcess,
    /// A job is running the handler
    InProgress,
    /// Parked; completion is checked like `InProgress`
    Paused,
    /// Handler finished successfully
    Processed,
    /// Handler failed, or the message was in an invalid state
    Failed,
    /// Producer did not set a valid state
    Unknown,
}

impl Default for MessageState {
    fn default() -> Self {
        Self::Active
    }
}

impl MessageState {
    /// Processed and failed messages are garbage collected on the next scan
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// States in which a job is tracked in the executing table
    pub fn is_running(self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }

    /// Position in the lifecycle, used to check that states only move forward
    pub fn stage(self) -> u8 {
        match self {
            Self::Active | Self::Unknown => 0,
            Self::ToProcess => 1,
            Self::InProgress | Self::Paused => 2,
            Self::Processed | Self::Failed => 3,
        }
    }

    /// Whether the worker is allowed to move a message from `self` to `next`
    pub fn can_transition_to(self, next: MessageState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.stage() > self.stage() || (self.is_running() && next.is_running())
    }

    /// Get the state name as a string
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ToProcess => "to_process",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
