//! Centralized error types for the Jinglecast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Display strings of operator-facing variants are the messages shown to the
//! chat that issued the command.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::audio::SourceError;
use crate::protocol::InvalidGroupId;
use crate::queue::DuplicateTaskId;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for SourceError {
    fn code(&self) -> &'static str {
        match self {
            Self::Download(_) => "download_failed",
            Self::TooLarge(_) => "audio_too_large",
            Self::Spawn(_) | Self::Io(_) | Self::Converter { .. } => "conversion_failed",
        }
    }
}

/// Application-wide error type for the Jinglecast coordinator.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum JingleError {
    /// The chat has no group token yet.
    #[error("You have not connected a client yet. Send /token to get a token for this chat.")]
    NoToken,

    /// The command needs an audio file and none was attached.
    #[error("Please reply with /{command} to a voice message or audio file")]
    NoAudio { command: String },

    /// The attached audio file is above the size limit.
    #[error("The audio file cannot be larger than 20MB due to Telegram API limitations.")]
    AudioTooLarge,

    /// The converted broadcast (jingle plus clip) is longer than endpoints accept.
    #[error("The audio is too long. Broadcasts can last at most {max_minutes} minutes.")]
    AudioTooLong { max_minutes: u64 },

    /// Downloading or converting audio failed.
    #[error("Audio conversion failed: {0}")]
    Conversion(String),

    /// The chat is not on the allow-list.
    #[error("This chat is not allowed to use this service.")]
    ChatNotAllowed,

    /// A group token does not have the expected format.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// A broadcast with this id is already queued.
    #[error("Request already queued: {0}")]
    DuplicateRequest(String),

    /// Nothing to cancel under this id.
    #[error("Request not found: {0}")]
    RequestNotFound(String),

    /// Reading or writing persisted chat records failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JingleError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::NoAudio { .. } => "no_audio",
            Self::AudioTooLarge => "audio_too_large",
            Self::AudioTooLong { .. } => "audio_too_long",
            Self::Conversion(_) => "conversion_failed",
            Self::ChatNotAllowed => "chat_not_allowed",
            Self::InvalidToken(_) => "invalid_token",
            Self::DuplicateRequest(_) => "duplicate_request",
            Self::RequestNotFound(_) => "request_not_found",
            Self::Storage(_) => "storage_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoToken | Self::RequestNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoAudio { .. } | Self::InvalidToken(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AudioTooLarge | Self::AudioTooLong { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ChatNotAllowed => StatusCode::FORBIDDEN,
            Self::DuplicateRequest(_) => StatusCode::CONFLICT,
            Self::Conversion(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type JingleResult<T> = Result<T, JingleError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for JingleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SourceError> for JingleError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::TooLarge(_) => Self::AudioTooLarge,
            other => Self::Conversion(other.to_string()),
        }
    }
}

impl From<InvalidGroupId> for JingleError {
    fn from(err: InvalidGroupId) -> Self {
        Self::InvalidToken(err.0)
    }
}

impl From<DuplicateTaskId> for JingleError {
    fn from(err: DuplicateTaskId) -> Self {
        Self::DuplicateRequest(err.0)
    }
}

impl From<std::io::Error> for JingleError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
