use serde::{Deserialize, Serialize};

/// Lifecycle of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    /// Created, not fired yet
    Created,
    /// Fired at least once and waiting for the next expiration
    Active,
    /// Timeout callback running
    InTimeout,
    /// Last callback failed, retrying
    RetryTimeout,
    /// No further expirations
    Expired,
    /// Cancelled by the bean
    Canceled,
}

impl TimerState {
    /// Expired and canceled timers never change again
    pub fn is_final(self) -> bool {
        matches!(self, Self::Expired | Self::Canceled)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::InTimeout => "in_timeout",
            Self::RetryTimeout => "retry_timeout",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
