//! Value ⇄ bytes conversion for byte-oriented cache stores.
//!
//! Any type implementing [`serde::Serialize`] and [`serde::de::DeserializeOwned`] can be cached. For every value that
//! encodes without an error, decoding the produced bytes yields a value equal to the encoded one.
//!
//! Encoding is allowed to fail on shapes a codec cannot represent, e.g. a type whose `Serialize` implementation
//! refuses to serialize a live handle. [`PostcardCodec`] is not self-describing and rejects types that can only be
//! deserialized through `deserialize_any` (untagged enums, `serde_json::Value` and the like); use [`JsonCodec`] for
//! those.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("postcard codec: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait Codec: Default + Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Compact binary encoding. The default codec of [`ReadThroughCache`](crate::ReadThroughCache).
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    #[inline]
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(postcard::to_allocvec(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Self-describing JSON encoding, for stores that are also read by non-Rust consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    #[inline]
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
