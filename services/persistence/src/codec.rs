//! Payload codec for typed journal records
//!
//! Records are bincode-encoded before framing. The frame already carries a
//! checksum, so the codec adds nothing but (de)serialization.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Record codec error: {0}")]
pub struct CodecError(String);

pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(record).map_err(|e| CodecError(e.to_string()))
}

pub fn decode_record<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(payload).map_err(|e| CodecError(e.to_string()))
}
