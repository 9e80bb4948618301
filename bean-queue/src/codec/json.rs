use crate::{QueueResult, codec::{EnvelopeCodec, MessageEnvelope}};

/// JSON codec for transport envelopes
#[derive(Debug, Clone)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &MessageEnvelope) -> QueueResult<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> QueueResult<MessageEnvelope> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn codec_id(&self) -> &'static str {
        "json"
    }
}
