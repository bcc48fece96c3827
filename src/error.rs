use serde::Serialize;
use thiserror::Error;

pub const CAPTURE_START_MESSAGE: &str = "Microphone access denied or error starting recorder.";
pub const FIRST_ATTEMPT_MESSAGE: &str =
    "Failed to process your speaking response. Please try again.";
pub const RETRY_ATTEMPT_MESSAGE: &str = "Failed to correct your practice attempt.";

/// Failures while acquiring the microphone or finalizing a take.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("input stream failed: {0}")]
    StreamFailed(String),

    #[error("recording contained no audio")]
    EmptyRecording,

    #[error("failed to encode recording: {0}")]
    Encoding(String),
}

impl CaptureError {
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::DeviceUnavailable(_) | CaptureError::StreamFailed(_) => {
                CAPTURE_START_MESSAGE.to_string()
            }
            CaptureError::EmptyRecording => {
                "No audio was captured. Please try recording again.".to_string()
            }
            CaptureError::Encoding(_) => {
                "Your recording could not be prepared. Please try again.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    FirstAttempt,
    Retry,
}

impl AttemptKind {
    pub fn user_message(self) -> &'static str {
        match self {
            AttemptKind::FirstAttempt => FIRST_ATTEMPT_MESSAGE,
            AttemptKind::Retry => RETRY_ATTEMPT_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationFailure {
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),

    #[error("request to model endpoint failed: {0}")]
    Transport(String),

    #[error("model endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model reply contained no text")]
    EmptyReply,

    #[error("model reply is not valid feedback JSON: {0}")]
    MalformedReply(String),
}

/// Displays as the user-facing message; the technical cause is kept as the source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", .attempt.user_message())]
pub struct EvaluationError {
    pub attempt: AttemptKind,
    #[source]
    pub cause: EvaluationFailure,
}

impl EvaluationError {
    pub fn new(attempt: AttemptKind, cause: EvaluationFailure) -> Self {
        Self { attempt, cause }
    }
}
