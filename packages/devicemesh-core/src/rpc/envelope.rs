//! Wire formats for RPC over pub/sub.
//!
//! Requests travel as `{"body": "<string>", "responseTopic": "<topic>"}`.
//! Replies are either the raw serialized result or `{"error": "<message>"}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol_constants::ERROR_KEY;

use super::{RpcError, RpcResult};

/// Request wrapper carrying the topic the server must reply to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Opaque request body.
    pub body: String,
    /// Topic the single reply is published to.
    pub response_topic: String,
}

impl Envelope {
    /// Creates a new envelope.
    pub fn new(body: impl Into<String>, response_topic: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            response_topic: response_topic.into(),
        }
    }

    /// Serializes the envelope to JSON bytes.
    pub fn encode(&self) -> RpcResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| RpcError::Protocol(e.to_string()))
    }

    /// Parses an envelope from JSON bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Reply published when a handler fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Handler failure message. Only the string survives the wire.
    pub error: String,
}

impl ErrorReply {
    /// Serializes an error reply for `message`.
    #[must_use]
    pub fn encode(message: &str) -> Bytes {
        // A single string field always serializes.
        let json = serde_json::json!({ ERROR_KEY: message });
        Bytes::from(json.to_string())
    }
}

/// Interprets a raw reply as JSON.
///
/// A JSON object whose only key is `"error"` with a string value is the failure
/// reply and becomes [`RpcError::Application`]. Anything that is not JSON is a
/// [`RpcError::Protocol`] error.
pub fn parse_response(payload: &[u8]) -> RpcResult<Value> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| RpcError::Protocol(e.to_string()))?;

    if let Value::Object(ref map) = value {
        if map.len() == 1 {
            if let Some(Value::String(message)) = map.get(ERROR_KEY) {
                return Err(RpcError::Application(message.clone()));
            }
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_camel_case_response_topic() {
        let envelope = Envelope::new("{\"on\":true}", "ns/rpc/response/abc");
        let encoded = envelope.encode().unwrap();
        let raw: Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(raw["body"], "{\"on\":true}");
        assert_eq!(raw["responseTopic"], "ns/rpc/response/abc");
        assert_eq!(Envelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn envelope_without_response_topic_is_rejected() {
        assert!(Envelope::decode(br#"{"body":"x"}"#).is_err());
        assert!(Envelope::decode(b"not json").is_err());
    }

    #[test]
    fn error_reply_is_exact() {
        assert_eq!(&ErrorReply::encode("boom")[..], br#"{"error":"boom"}"#);
    }

    #[test]
    fn parse_response_maps_error_object() {
        assert_eq!(
            parse_response(br#"{"error":"boom"}"#),
            Err(RpcError::Application("boom".into()))
        );
    }

    #[test]
    fn parse_response_keeps_results_with_error_field() {
        let value = parse_response(br#"{"error":"none","level":3}"#).unwrap();
        assert_eq!(value, json!({"error": "none", "level": 3}));
        assert_eq!(parse_response(b"42").unwrap(), json!(42));
        assert_eq!(parse_response(b"null").unwrap(), Value::Null);
    }

    #[test]
    fn parse_response_rejects_non_json() {
        assert!(matches!(
            parse_response(b"<html>"),
            Err(RpcError::Protocol(_))
        ));
    }
}
