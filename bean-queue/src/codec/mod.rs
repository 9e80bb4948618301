pub mod json;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Message, MessageState, Priority, QueueError, QueueResult};

/// Transport envelope exchanged between a network-facing module and the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Target queue name
    pub destination: String,

    /// Priority key, see [`Priority::key`]
    pub priority: String,

    /// Session the producer belongs to
    #[serde(default)]
    pub session_id: String,

    /// Opaque payload
    pub payload: serde_json::Value,
}

impl MessageEnvelope {
    /// Wrap a message for transport
    pub fn from_message(message: &Message) -> Self {
        Self {
            destination: message.destination.clone(),
            priority: message.priority.key().to_string(),
            session_id: message.session_id.clone(),
            payload: message.payload.clone(),
        }
    }

    /// Build the message the queue will track
    pub fn into_message(self) -> QueueResult<Message> {
        let priority = Priority::from_key(&self.priority)
            .or_else(|| self.priority.parse().ok())
            .ok_or_else(|| QueueError::InvalidPriority(self.priority.clone()))?;

        Ok(Message::new(self.destination, self.payload)
            .with_priority(priority)
            .with_session_id(self.session_id)
            .with_state(MessageState::Active))
    }
}

/// Trait for envelope codecs
pub trait EnvelopeCodec: Send + Sync {
    /// Encode an envelope to bytes
    fn encode(&self, envelope: &MessageEnvelope) -> QueueResult<Vec<u8>>;

    /// Decode bytes to an envelope
    fn decode(&self, bytes: &[u8]) -> QueueResult<MessageEnvelope>;

    /// Get codec identifier
    fn codec_id(&self) -> &'static str;
}

/// Registry for managing different codecs
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn EnvelopeCodec>>,
    default_codec: String,
}

impl CodecRegistry {
    /// Create a new codec registry with JSON as default
    pub fn new() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
            default_codec: "json".to_string(),
        };

        registry.register(Arc::new(json::JsonCodec));
        registry
    }

    /// Register a new codec
    pub fn register(&mut self, codec: Arc<dyn EnvelopeCodec>) {
        let codec_id = codec.codec_id().to_string();
        self.codecs.insert(codec_id, codec);
    }

    /// Get a codec by ID
    pub fn get_codec(&self, codec_id: &str) -> QueueResult<Arc<dyn EnvelopeCodec>> {
        self.codecs
            .get(codec_id)
            .cloned()
            .ok_or_else(|| QueueError::CodecNotFound(codec_id.to_string()))
    }

    /// Get the default codec
    pub fn default_codec(&self) -> QueueResult<Arc<dyn EnvelopeCodec>> {
        self.get_codec(&self.default_codec)
    }

    /// Set the default codec
    pub fn set_default_codec(&mut self, codec_id: &str) -> QueueResult<()> {
        if self.codecs.contains_key(codec_id) {
            self.default_codec = codec_id.to_string();
            Ok(())
        } else {
            Err(QueueError::CodecNotFound(codec_id.to_string()))
        }
    }

    /// List available codecs
    pub fn available_codecs(&self) -> Vec<String> {
        self.codecs.keys().cloned().collect()
    }

    /// Decode transport bytes with the default codec
    pub fn decode_envelope(&self, bytes: &[u8]) -> QueueResult<MessageEnvelope> {
        self.default_codec()?.decode(bytes)
    }

    /// Encode an envelope with the default codec
    pub fn encode_envelope(&self, envelope: &MessageEnvelope) -> QueueResult<Vec<u8>> {
        self.default_codec()?.encode(envelope)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CodecRegistry {
    fn clone(&self) -> Self {
        Self {
            codecs: self.codecs.clone(),
            default_codec: self.default_codec.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_resolves_priority_keys() {
        let envelope = MessageEnvelope {
            destination: "orders".into(),
            priority: "priority_low".into(),
            session_id: "s1".into(),
            payload: serde_json::json!({"sku": "A-1"}),
        };

        let message = envelope.into_message().unwrap();
        assert_eq!(message.priority, Priority::Low);
        assert_eq!(message.session_id, "s1");
        assert_eq!(message.state, MessageState::Active);
    }

    #[test]
    fn envelope_rejects_unknown_priority() {
        let envelope = MessageEnvelope {
            destination: "orders".into(),
            priority: "priority_urgent".into(),
            session_id: String::new(),
            payload: serde_json::Value::Null,
        };

        assert!(matches!(envelope.into_message(), Err(QueueError::InvalidPriority(_))));
    }

    #[test]
    fn unknown_default_codec_is_rejected() {
        let mut registry = CodecRegistry::new();
        assert!(registry.set_default_codec("msgpack").is_err());
        assert_eq!(registry.available_codecs(), vec!["json".to_string()]);
    }
}
