//! Error taxonomy surfaced at the pipeline boundaries.
//!
//! Internal helpers work with `anyhow::Result` and attach context as they go.
//! Boundary operations convert into a `MonitorError`, which carries a stable code
//! and a status classification for the HTTP layer.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad file type, missing payload, undecodable media. Caller's fault.
    InvalidInput,
    /// The detector could not be constructed.
    ModelUnavailable,
    /// The detector raised while processing a frame.
    InferenceFailure,
    /// A camera could not be opened or is already in use.
    ResourceUnavailable,
    /// An annotated frame could not be serialized.
    EncodingFailure,
    /// Upload/result artifacts could not be written or purged.
    StorageFailure,
}

/// Coarse status classification for the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    ServiceUnavailable,
    Internal,
}

impl StatusClass {
    pub fn http_status(self) -> u16 {
        match self {
            StatusClass::BadRequest => 400,
            StatusClass::ServiceUnavailable => 503,
            StatusClass::Internal => 500,
        }
    }
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::InferenceFailure => "inference_failure",
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::EncodingFailure => "encoding_failure",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }

    pub fn status(self) -> StatusClass {
        match self {
            ErrorKind::InvalidInput => StatusClass::BadRequest,
            ErrorKind::ModelUnavailable | ErrorKind::ResourceUnavailable => {
                StatusClass::ServiceUnavailable
            }
            ErrorKind::InferenceFailure
            | ErrorKind::EncodingFailure
            | ErrorKind::StorageFailure => StatusClass::Internal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type MonitorResult<T> = Result<T, MonitorError>;

impl MonitorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an internal error, keeping its full context chain in the message.
    pub fn from_anyhow(kind: ErrorKind, err: anyhow::Error) -> Self {
        Self::new(kind, format!("{:#}", err))
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelUnavailable, message)
    }

    pub fn inference_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceFailure, message)
    }

    pub fn resource_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceUnavailable, message)
    }

    pub fn encoding_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EncodingFailure, message)
    }

    pub fn storage_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFailure, message)
    }

    pub fn status(&self) -> StatusClass {
        self.kind.status()
    }

    /// Message suitable for the `{error: ...}` response body.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::ModelUnavailable => format!("Model not ready: {}", self.message),
            _ => self.message.clone(),
        }
    }
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for MonitorError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn status_classification() {
        assert_eq!(ErrorKind::InvalidInput.status().http_status(), 400);
        assert_eq!(ErrorKind::ModelUnavailable.status().http_status(), 503);
        assert_eq!(ErrorKind::EncodingFailure.status().http_status(), 500);
    }

    #[test]
    fn model_unavailable_reads_as_not_ready() {
        let err = MonitorError::model_unavailable("model/best.onnx missing");
        assert_eq!(err.user_message(), "Model not ready: model/best.onnx missing");
        assert_eq!(err.to_string(), "model_unavailable: model/best.onnx missing");
    }

    #[test]
    fn anyhow_context_is_preserved() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("disk full"));
        let err = inner.context("write result").unwrap_err();
        let err = MonitorError::from_anyhow(ErrorKind::StorageFailure, err);
        assert_eq!(err.message, "write result: disk full");
    }
}
