//! Progress-channel wire codec.
//!
//! One notification channel carries two distinct payload shapes: structured
//! webhook-response reports and a bare abort sentinel. This module decodes
//! them into a single tagged union exactly once at the channel boundary, so
//! no downstream handler ever shape-sniffs raw JSON.

use jobstream_core::types::ExecutionId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Reserved scalar sent on a job's progress channel to request that the
/// executing worker cooperatively stop the job.
///
/// Deliberately a plain string rather than an object so it can never be
/// confused with a structured report.
pub const ABORT_SIGNAL: &str = "abort-job";

/// Structured reports carried on the progress channel.
///
/// Serialized with an internal `"kind"` tag, e.g.
/// `{"kind":"webhook-response","executionId":"E1","response":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProgressReport {
    /// A completed HTTP-style response destined for a waiting caller on the
    /// dispatcher side.
    #[serde(rename = "webhook-response")]
    WebhookResponse {
        #[serde(rename = "executionId")]
        execution_id: ExecutionId,
        /// Response payload; its body may be a base64-encoded binary blob,
        /// unpacked by the webhook response decoder on the receiving side.
        response: Value,
    },
}

/// A decoded progress payload: either a structured report or the abort
/// sentinel. The two shapes are distinguishable by type alone.
#[derive(Debug, Clone, PartialEq)]
pub enum JobProgress {
    Report(ProgressReport),
    Abort,
}

/// Decode a raw progress payload into a [`JobProgress`].
///
/// Returns `None` for payloads that are neither shape (e.g. numeric
/// percentage updates emitted by other tooling on the same channel); callers
/// should skip those without treating them as errors.
pub fn decode_progress(payload: &Value) -> Option<JobProgress> {
    match payload {
        Value::String(s) if s == ABORT_SIGNAL => Some(JobProgress::Abort),
        Value::Object(_) => serde_json::from_value(payload.clone())
            .ok()
            .map(JobProgress::Report),
        _ => None,
    }
}

/// Encode a [`JobProgress`] into the JSON shape that crosses the wire.
pub fn encode_progress(progress: &JobProgress) -> Value {
    match progress {
        JobProgress::Abort => Value::String(ABORT_SIGNAL.to_string()),
        JobProgress::Report(ProgressReport::WebhookResponse {
            execution_id,
            response,
        }) => json!({
            "kind": "webhook-response",
            "executionId": execution_id,
            "response": response,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_abort_sentinel() {
        let payload = json!("abort-job");
        assert_eq!(decode_progress(&payload), Some(JobProgress::Abort));
    }

    #[test]
    fn decode_webhook_response_report() {
        let payload = json!({
            "kind": "webhook-response",
            "executionId": "E1",
            "response": {"status": 200},
        });
        match decode_progress(&payload) {
            Some(JobProgress::Report(ProgressReport::WebhookResponse {
                execution_id,
                response,
            })) => {
                assert_eq!(execution_id, "E1");
                assert_eq!(response, json!({"status": 200}));
            }
            other => panic!("Expected webhook-response report, got {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_string_is_none() {
        assert_eq!(decode_progress(&json!("49 percent")), None);
    }

    #[test]
    fn decode_unknown_object_is_none() {
        assert_eq!(decode_progress(&json!({"percent": 49})), None);
    }

    #[test]
    fn decode_scalar_is_none() {
        assert_eq!(decode_progress(&json!(42)), None);
    }

    #[test]
    fn abort_and_report_shapes_never_overlap() {
        // The sentinel is a string and every report is a tagged object, so
        // a single payload can only ever decode to one variant.
        let abort = encode_progress(&JobProgress::Abort);
        assert!(abort.is_string());

        let report = encode_progress(&JobProgress::Report(ProgressReport::WebhookResponse {
            execution_id: "E1".into(),
            response: json!(null),
        }));
        assert!(report.is_object());
    }

    #[test]
    fn encode_decode_round_trip() {
        let original = JobProgress::Report(ProgressReport::WebhookResponse {
            execution_id: "exec-7".into(),
            response: json!({"status": 201, "body": {"ok": true}}),
        });
        let decoded = decode_progress(&encode_progress(&original));
        assert_eq!(decoded, Some(original));
    }
}
