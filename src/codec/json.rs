use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Codec, Payload};
use crate::utils::error::{DecodeError, EncodeError};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Schema-less text codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, EncodeError> {
        let bytes = serde_json::to_vec(value).map_err(EncodeError::Json)?;
        Ok(Payload {
            content_type: JSON_CONTENT_TYPE,
            bytes,
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Json)
    }
}
