//! Webhook response decoder.
//!
//! Progress payloads travel through a JSON-only channel, so a binary HTTP
//! response body is round-tripped through base64: the worker packs the bytes
//! into an object carrying [`ENCODED_BODY_KEY`], and the dispatcher unpacks
//! them here before resolving the waiting caller.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};

/// Reserved marker key identifying an encoded binary body.
pub const ENCODED_BODY_KEY: &str = "__encodedBuffer__";

/// A webhook response after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookResponse {
    /// The response carried no encoded body and passes through unchanged.
    Json(Value),
    /// The response body was an encoded binary blob, now raw bytes.
    /// `response` is the original object with the body removed.
    Binary { response: Value, body: Vec<u8> },
}

/// Pack a binary response body for transport on the JSON progress channel.
///
/// Worker-side counterpart of [`decode_response`].
pub fn encode_body(bytes: &[u8]) -> Value {
    json!({ ENCODED_BODY_KEY: STANDARD.encode(bytes) })
}

/// Unpack a response payload received on the progress channel.
///
/// If the response is an object whose `body` is itself an object carrying
/// [`ENCODED_BODY_KEY`], the body is replaced by the decoded bytes.
/// Anything else passes through unchanged.
pub fn decode_response(response: Value) -> WebhookResponse {
    let encoded = response
        .get("body")
        .and_then(|body| body.get(ENCODED_BODY_KEY))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let Some(encoded) = encoded else {
        return WebhookResponse::Json(response);
    };

    match STANDARD.decode(&encoded) {
        Ok(bytes) => {
            let mut head = response;
            if let Some(object) = head.as_object_mut() {
                object.remove("body");
            }
            WebhookResponse::Binary {
                response: head,
                body: bytes,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Encoded response body is not valid base64");
            WebhookResponse::Json(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_body_round_trips_byte_exact() {
        let bytes = [0x00u8, 0xFF, 0x10];
        let response = json!({"status": 200, "body": encode_body(&bytes)});

        match decode_response(response) {
            WebhookResponse::Binary { response, body } => {
                assert_eq!(body, bytes);
                assert_eq!(response, json!({"status": 200}));
            }
            other => panic!("Expected binary body, got {other:?}"),
        }
    }

    #[test]
    fn response_without_marker_passes_through_unchanged() {
        let response = json!({"status": 200, "body": {"ok": true}});
        assert_eq!(
            decode_response(response.clone()),
            WebhookResponse::Json(response)
        );
    }

    #[test]
    fn non_object_response_passes_through() {
        let response = json!("accepted");
        assert_eq!(
            decode_response(response.clone()),
            WebhookResponse::Json(response)
        );
    }

    #[test]
    fn invalid_base64_passes_through() {
        let response = json!({"body": {ENCODED_BODY_KEY: "not base64!!"}});
        assert_eq!(
            decode_response(response.clone()),
            WebhookResponse::Json(response)
        );
    }

    #[test]
    fn empty_body_round_trips() {
        let response = json!({"body": encode_body(&[])});
        match decode_response(response) {
            WebhookResponse::Binary { body, .. } => assert!(body.is_empty()),
            other => panic!("Expected binary body, got {other:?}"),
        }
    }
}
