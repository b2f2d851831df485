//! # Error Handling
//!
//! Custom error types for the agent backend and their HTTP mapping.
//!
//! ## Error Categories:
//! - **Auth**: invalid/expired connect token (401, policy close on the socket)
//! - **RateLimited**: connection or message quota exceeded (429)
//! - **Transcription / Llm / Synthesis**: upstream AI-service failures; the
//!   orchestrator catches these and degrades instead of surfacing them
//! - **Audit**: audit-store failures; logged, never sent to the client
//! - **BadFrame**: malformed inbound frame; logged per frame, loop continues
//! - **Config / Internal**: server-side problems (500)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors produced anywhere in the agent backend.
#[derive(Debug)]
pub enum AgentError {
    /// Invalid, expired, or missing connect token.
    Auth(String),

    /// Connection or message quota exceeded.
    RateLimited(String),

    /// Upstream speech-to-text failure or timeout.
    Transcription(String),

    /// Upstream planner failure, timeout, or unusable response.
    Llm(String),

    /// Upstream text-to-speech failure.
    Synthesis(String),

    /// Audit-store append/update failure.
    Audit(String),

    /// Unparseable or out-of-protocol inbound frame.
    BadFrame(String),

    /// Configuration file or environment variable problems.
    Config(String),

    /// Anything else during processing.
    Internal(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            AgentError::RateLimited(msg) => write!(f, "rate limit exceeded: {}", msg),
            AgentError::Transcription(msg) => write!(f, "transcription failed: {}", msg),
            AgentError::Llm(msg) => write!(f, "plan generation failed: {}", msg),
            AgentError::Synthesis(msg) => write!(f, "speech synthesis failed: {}", msg),
            AgentError::Audit(msg) => write!(f, "audit write failed: {}", msg),
            AgentError::BadFrame(msg) => write!(f, "bad frame: {}", msg),
            AgentError::Config(msg) => write!(f, "configuration error: {}", msg),
            AgentError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

impl ResponseError for AgentError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AgentError::Auth(_) => StatusCode::UNAUTHORIZED,
            AgentError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AgentError::BadFrame(_) => StatusCode::BAD_REQUEST,
            AgentError::Transcription(_) => StatusCode::BAD_GATEWAY,
            AgentError::Llm(_) => StatusCode::BAD_GATEWAY,
            AgentError::Synthesis(_) => StatusCode::BAD_GATEWAY,
            AgentError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AgentError::Auth(msg) => (
                actix_web::http::StatusCode::UNAUTHORIZED,
                "auth_error",
                msg.clone(),
            ),
            AgentError::RateLimited(msg) => (
                actix_web::http::StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                msg.clone(),
            ),
            AgentError::BadFrame(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_frame",
                msg.clone(),
            ),
            AgentError::Transcription(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "transcription_error",
                msg.clone(),
            ),
            AgentError::Llm(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "llm_error",
                msg.clone(),
            ),
            AgentError::Synthesis(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "synthesis_error",
                msg.clone(),
            ),
            AgentError::Audit(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "audit_error",
                msg.clone(),
            ),
            AgentError::Config(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AgentError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::BadFrame(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}

/// Shorthand for results using the backend's error type.
pub type AgentResult<T> = Result<T, AgentError>;
