//! Request and response payloads at the upload, stats and reset boundaries.

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::error::{MonitorError, StatusClass};
use crate::frame::to_base64;
use crate::pipeline::{ImageOutcome, VideoOutcome};

/// An uploaded file as handed over by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Upload {
    pub filename: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub confidence_threshold: Option<f32>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            confidence_threshold: None,
        }
    }

    pub fn with_confidence(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub success: bool,
    pub detections: Vec<Detection>,
    /// Base64 of the persisted annotated image.
    pub image: String,
    pub filename: String,
    pub total_detections: usize,
}

impl From<&ImageOutcome> for ImageResponse {
    fn from(outcome: &ImageOutcome) -> Self {
        Self {
            success: true,
            detections: outcome.detections.clone(),
            image: to_base64(&outcome.encoded),
            filename: outcome.result_name.clone(),
            total_detections: outcome.detections.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoResponse {
    pub success: bool,
    pub video_filename: String,
    /// Base64 JPEG of the first annotated frame.
    pub preview: String,
    pub message: String,
}

impl From<&VideoOutcome> for VideoResponse {
    fn from(outcome: &VideoOutcome) -> Self {
        Self {
            success: true,
            video_filename: outcome.video_name.clone(),
            preview: to_base64(&outcome.preview),
            message: "Video processing completed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error body plus the status class the transport should answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusClass,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        Self {
            status: err.status(),
            body: ErrorResponse {
                error: err.user_message(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn image_response_matches_dashboard_shape() {
        let outcome = ImageOutcome {
            detections: vec![Detection {
                bbox: [1, 2, 3, 4],
                confidence: 0.5,
                class: "safe".to_string(),
            }],
            result_name: "result_ab_x.png".to_string(),
            result_path: PathBuf::from("results/result_ab_x.png"),
            encoded: vec![1, 2, 3],
        };
        let json = serde_json::to_value(ImageResponse::from(&outcome)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["image"], "AQID");
        assert_eq!(json["filename"], "result_ab_x.png");
        assert_eq!(json["total_detections"], 1);
        assert_eq!(json["detections"][0]["bbox"], serde_json::json!([1, 2, 3, 4]));
    }

    #[test]
    fn api_error_carries_status_and_message() {
        let api: ApiError = MonitorError::model_unavailable("weights missing").into();
        assert_eq!(api.http_status(), 503);
        assert_eq!(
            serde_json::to_string(&api.body).unwrap(),
            r#"{"error":"Model not ready: weights missing"}"#
        );
    }
}
