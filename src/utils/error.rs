//! Error types and handling
//!
//! Common error types used across the recorder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Room error: {0}")]
    Room(String),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error body returned by the HTTP front door
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        let code = match &error {
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
            RecorderError::Encoder(_) => "ENCODER_ERROR",
            RecorderError::Room(_) => "ROOM_ERROR",
            RecorderError::Token(_) => "TOKEN_ERROR",
            RecorderError::Config(_) => "CONFIG_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_code() {
        let response = ErrorResponse::from(RecorderError::Room("join refused".to_string()));
        assert_eq!(response.code, "ROOM_ERROR");
        assert_eq!(response.message, "Room error: join refused");
    }
}
