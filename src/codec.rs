//! Message payloads and the pluggable object codec
//!
//! Raw byte payloads travel untouched. Anything else goes through a
//! [`Codec`] chosen by the application; [`JsonCodec`] covers any serde type.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Object (de)serializer shared by a sender and its receivers
pub trait Codec: Send + Sync + 'static {
    /// Object type carried by the channel
    type Item: Send + Sync + 'static;

    /// Turn an object into bytes
    fn serialize(&self, item: &Self::Item) -> Result<Vec<u8>>;

    /// Turn bytes back into an object
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Item>;
}

/// One message, either raw bytes or a codec object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload<T> {
    /// Sent as is, flag byte `1`
    Bytes(Bytes),
    /// Sent through the codec, flag byte `0`
    Object(T),
}

impl<T> Payload<T> {
    /// Whether this payload bypasses the codec
    pub fn is_raw(&self) -> bool {
        matches!(self, Payload::Bytes(_))
    }

    /// The raw bytes, if any
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Object(_) => None,
        }
    }

    /// The object, if any
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Payload::Bytes(_) => None,
            Payload::Object(item) => Some(item),
        }
    }
}

impl<T> From<Bytes> for Payload<T> {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl<T> From<Vec<u8>> for Payload<T> {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

/// JSON codec for any serde type
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    /// Create a codec
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = T;

    fn serialize(&self, item: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(item).map_err(|e| Error::Codec(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tick {
        seq: u64,
        label: String,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Tick>::new();
        let tick = Tick {
            seq: 7,
            label: "seven".into(),
        };

        let bytes = codec.serialize(&tick).unwrap();
        assert_eq!(codec.deserialize(&bytes).unwrap(), tick);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec::<Tick>::new();
        let err = codec.deserialize(b"\x00\x01").unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn test_payload_accessors() {
        let raw: Payload<u32> = Payload::from(vec![1, 2, 3]);
        assert!(raw.is_raw());
        assert_eq!(raw.as_bytes().unwrap().as_ref(), &[1, 2, 3]);
        assert!(raw.as_object().is_none());

        let object = Payload::Object(5u32);
        assert!(!object.is_raw());
        assert_eq!(object.as_object(), Some(&5));
    }
}
