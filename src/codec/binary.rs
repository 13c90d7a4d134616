use bincode::Options;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Codec, Payload};
use crate::utils::error::{DecodeError, EncodeError};

pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Compact binary codec backed by `bincode`.
///
/// Decoding is strict: trailing bytes after the value are rejected so that a
/// payload of another type is not silently accepted as a prefix match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BincodeCodec;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        BINCODE_CONTENT_TYPE
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, EncodeError> {
        let bytes = options().serialize(value).map_err(EncodeError::Binary)?;
        Ok(Payload {
            content_type: BINCODE_CONTENT_TYPE,
            bytes,
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        options().deserialize(bytes).map_err(DecodeError::Binary)
    }
}
