// Typed payload model
//
// A queue is typed over its payload; the payload type plays the role the
// runtime exemplar plays in dynamically typed queue systems. Items must
// round-trip through JSON without loss, or the worker drops them with an
// error log instead of crashing.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Marker trait for queue payloads.
///
/// Blanket-implemented for every serde-capable type, so callers never
/// implement it by hand.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Serialize a payload into the FIFO's byte representation.
pub fn encode<P: Payload>(item: &P) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(item)?)
}

/// Deserialize raw FIFO bytes back into the payload type.
pub fn decode<P: Payload>(raw: &[u8]) -> Result<P> {
    Ok(serde_json::from_slice(raw)?)
}
