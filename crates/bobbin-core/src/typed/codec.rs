//! PayloadCodec - payload bytes と型の相互変換
//!
//! payload は store から見ると opaque な bytes です。型付き API では JSON で encode します。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// CodecError は encode / decode の失敗
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("json decode: {0}")]
    Decode(#[source] serde_json::Error),
}

/// JSON payload codec.
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::Encode)
    }

    /// An empty payload decodes as JSON `null`, so unit tasks need no body.
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        let bytes = if bytes.is_empty() { b"null".as_slice() } else { bytes };
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::task::fixtures::{HelloWorld, WelcomeEmail};

    #[test]
    fn typed_payload_roundtrip() {
        let bytes = PayloadCodec::encode(&WelcomeEmail { user_id: 7 }).unwrap();
        assert_eq!(bytes, br#"{"user_id":7}"#);
        let back: WelcomeEmail = PayloadCodec::decode(&bytes).unwrap();
        assert_eq!(back.user_id, 7);
    }

    #[test]
    fn empty_payload_decodes_unit_task() {
        let task: HelloWorld = PayloadCodec::decode(&[]).unwrap();
        assert_eq!(task, HelloWorld);
    }

    #[test]
    fn wrong_shape_is_a_decode_error() {
        let err = PayloadCodec::decode::<WelcomeEmail>(br#"{"user":"x"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().starts_with("json decode"));
    }
}
