//! Reply framing for the line-oriented protocol.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One reply line. Exactly one of `result` / `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn result(id: i64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Error reply for a line whose id could not be recovered.
    ///
    /// Uses id `-1` so the line still parses as a reply on the far side.
    pub fn unaddressed_error(message: impl Into<String>) -> Self {
        Self::error(-1, message)
    }

    /// Serializes to one protocol line (no trailing newline).
    pub fn to_line(&self) -> String {
        // Reply contains only JSON-safe types; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"id":-1,"error":"reply serialization failed"}"#.to_string()
        })
    }
}

/// Encodes captured image bytes for embedding in a JSON result.
pub fn encode_image(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes an image payload produced by [`encode_image`].
pub fn decode_image(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_reply_omits_error_field() {
        let line = Reply::result(4, json!({"pong": true})).to_line();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 4);
        assert_eq!(value["result"]["pong"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_reply_omits_result_field() {
        let line = Reply::error(5, "unknown method").to_line();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["error"], "unknown method");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn image_payload_round_trips() {
        let bytes = [0x89u8, 0x50, 0x4e, 0x47, 0x00, 0xff];
        let payload = encode_image(&bytes);
        assert_eq!(decode_image(&payload).unwrap(), bytes);
    }
}
