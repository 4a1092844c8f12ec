use scene_wire::WireError;
use serde::Serialize;

use crate::scheduler::RequestContext;

/// Network or HTTP status failure. `status` is 0 when no response was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("request failed with status {status}: {message}")]
pub struct FetchError {
    pub status: u16,
    pub message: String,
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("connection not initialized; send initializeConnection first")]
    NotConnected,
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

impl WorkerError {
    /// Label used for failure metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Fetch(_) => "network",
            WorkerError::Wire(err) if err.is_payload_error() => "payload",
            WorkerError::Wire(_) => "framing",
            WorkerError::NotConnected => "connection",
            WorkerError::InvalidBaseUrl(_) | WorkerError::InvalidRequest(_) => "request",
        }
    }

    pub fn to_report(&self, context: &RequestContext) -> ErrorReport {
        let (error_text, error, reason) = match self {
            WorkerError::Fetch(err) => ("Request failed", None, Some(err.clone())),
            WorkerError::Wire(err) if err.is_payload_error() => {
                ("Invalid response payload", Some(err.to_string()), None)
            }
            WorkerError::Wire(err) => ("Malformed response frame", Some(err.to_string()), None),
            WorkerError::NotConnected => ("Connection not initialized", None, None),
            WorkerError::InvalidBaseUrl(_) | WorkerError::InvalidRequest(_) => {
                ("Invalid request", Some(self.to_string()), None)
            }
        };
        ErrorReport {
            error_text: error_text.to_string(),
            error,
            reason,
            context: Some(context.clone()),
        }
    }
}

/// Body of the `notifyError` host message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FetchError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext::new("getMaterial", json!({"sceneId": "s1"}))
    }

    #[test_timeout::timeout]
    fn status_failures_carry_reason() {
        let err = WorkerError::from(FetchError {
            status: 404,
            message: "Not Found".into(),
        });
        let report = serde_json::to_value(err.to_report(&context())).expect("json");
        assert_eq!(report["errorText"], "Request failed");
        assert_eq!(report["reason"], json!({"status": 404, "message": "Not Found"}));
        assert_eq!(report["context"]["method"], "getMaterial");
        assert!(report.get("error").is_none());
    }

    #[test_timeout::timeout]
    fn wire_failures_split_framing_from_payload() {
        let framing = scene_wire::decode_frame(Bytes::from_static(b"setView[2"), false)
            .map_err(WorkerError::from)
            .unwrap_err();
        assert_eq!(framing.kind(), "framing");
        assert_eq!(framing.to_report(&context()).error_text, "Malformed response frame");

        let payload = scene_wire::decode_frame(Bytes::from_static(b"setView[2]{x"), false)
            .map_err(WorkerError::from)
            .unwrap_err();
        assert_eq!(payload.kind(), "payload");
        assert!(payload.to_report(&context()).error.is_some());
    }
}
