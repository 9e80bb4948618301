use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use bean_core::SessionId;

use super::{MessageId, MessageState, Priority};
use crate::QueueResult;

/// Message - submission data handed to a message-driven bean
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,

    /// Target queue name
    pub destination: String,

    /// Priority partition the message is processed in
    pub priority: Priority,

    /// State the producer submitted the message in
    pub state: MessageState,

    /// Session the handler runs under
    pub session_id: String,

    /// Arbitrary serializable payload
    pub payload: serde_json::Value,

    /// Message this one was produced from (by id, never owned)
    pub parent_id: Option<MessageId>,

    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message for a destination
    pub fn new(destination: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: MessageId::new(),
            destination: destination.into(),
            priority: Priority::default(),
            state: MessageState::Active,
            session_id: String::new(),
            payload,
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    /// Create a message from a typed payload
    pub fn from_value<T: Serialize>(destination: impl Into<String>, payload: &T) -> QueueResult<Self> {
        Ok(Self::new(destination, serde_json::to_value(payload)?))
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the session id
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Reference the message this one derives from
    pub fn with_parent(mut self, parent: &Message) -> Self {
        self.parent_id = Some(parent.id.clone());
        self
    }

    /// Override the submission state
    pub fn with_state(mut self, state: MessageState) -> Self {
        self.state = state;
        self
    }

    /// Read the payload as a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Session as the invocation context type
    pub fn session(&self) -> SessionId {
        SessionId::new(self.session_id.clone())
    }
}
