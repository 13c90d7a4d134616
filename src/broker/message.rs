use crate::codec::Payload;

/// An outgoing message.
///
/// Built once by the publisher and never mutated afterwards.
///
/// # Fields
///
/// - `exchange` - Exchange the message is published to (`""` is the default exchange).
/// - `routing_key` - Literal key matched against queue bindings.
/// - `content_type` - Codec tag, e.g. `application/json`.
/// - `payload` - The encoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(exchange: &str, routing_key: &str, payload: Payload) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            content_type: payload.content_type.to_string(),
            payload: payload.bytes,
        }
    }
}

/// A message handed to a consumer.
///
/// `delivery_tag` is scoped to the channel that received it and is what
/// `basic_ack`/`basic_nack` take. `redelivered` is set when the broker has
/// handed this message out before (requeue or channel loss).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
}
