//! Payload encoding.
//!
//! Values are MessagePack (named fields). Counters are decimal ASCII so that
//! Redis `INCRBY` works on them directly.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CacheError, CacheResult};

pub fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CacheResult<T> {
    rmp_serde::from_slice(bytes).map_err(|e| CacheError::serialization(e.to_string()))
}

pub fn encode_counter(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

pub fn decode_counter(bytes: &[u8]) -> CacheResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| CacheError::serialization("value is not an integer counter"))
}
