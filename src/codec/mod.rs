//! The `codec` module turns typed values into transport payloads and back.
//!
//! A codec is picked per publish call and per subscription, never globally.
//! Both implementations tag the payload with a content type that travels in
//! the message properties:
//!
//! - [`JsonCodec`] (`application/json`): portable, human-inspectable text for
//!   moves and pause/resume signals.
//! - [`BincodeCodec`] (`application/x-bincode`): compact typed binary for
//!   records such as game logs where structural fidelity matters more.

mod binary;
mod json;

pub use binary::BincodeCodec;
pub use json::JsonCodec;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::utils::error::{DecodeError, EncodeError};

/// An encoded value together with the content type that describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Converts typed values to payload bytes and back.
///
/// Callers name the payload type at the call site (`codec.decode::<GameLog>(..)`),
/// so implementations stay stateless and cheap to copy into consumer tasks.
pub trait Codec: Send + Sync + 'static {
    /// Tag stored in the content-type property of every message this codec produces.
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, EncodeError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DecodeError>;
}

#[cfg(test)]
mod tests;
