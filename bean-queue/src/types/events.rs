use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, MessageState, Priority};

/// Event stream emitted by queue workers for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageEvent {
    /// Message was attached to a worker
    Attached {
        message_id: MessageId,
        queue: String,
        priority: Priority,
        at: DateTime<Utc>,
    },

    /// Worker moved a message to a new state
    StateChanged {
        message_id: MessageId,
        from: MessageState,
        to: MessageState,
        at: DateTime<Utc>,
    },

    /// Message left every tracking table
    Removed {
        message_id: MessageId,
        final_state: MessageState,
        at: DateTime<Utc>,
    },
}

impl MessageEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Attached { .. } => "attached",
            Self::StateChanged { .. } => "state_changed",
            Self::Removed { .. } => "removed",
        }
    }

    /// Get the message ID from any event
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Attached { message_id, .. } => message_id,
            Self::StateChanged { message_id, .. } => message_id,
            Self::Removed { message_id, .. } => message_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Attached { at, .. } => at,
            Self::StateChanged { at, .. } => at,
            Self::Removed { at, .. } => at,
        }
    }
}
