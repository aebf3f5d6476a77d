use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub const MISSING_MESSAGE_HINT: &str = "Please provide a message to chat with me!";
pub const INTERNAL_ERROR_REPLY: &str =
    "Oops, something went wrong on my end. Let's give it another shot!";

/// One failed attempt against the completion API with a single credential.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP {status}: {reason}")]
    Rejected { status: u16, reason: &'static str },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream returned an empty reply")]
    EmptyReply,

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl UpstreamError {
    /// Quota (402) or rate-limit (429) answer for this credential.
    pub fn rejected(status: u16) -> Self {
        let reason = if status == 402 {
            "INSUFFICIENT CREDITS"
        } else {
            "RATE LIMITED"
        };
        Self::Rejected { status, reason }
    }

    /// Label used for the attempts counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::Status { .. } => "status",
            Self::EmptyReply => "empty",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid JSON body")]
    InvalidJson,

    #[error("No message provided")]
    MissingMessage,

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            Self::InvalidJson => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response(),
            Self::MissingMessage => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": message,
                    "reply": MISSING_MESSAGE_HINT,
                })),
            )
                .into_response(),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "reply": INTERNAL_ERROR_REPLY,
                    "error": message,
                    "source": "error",
                })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no upstream API keys configured; set OPENROUTER_API_KEYS or run with --dev")]
    NoCredentials,

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
