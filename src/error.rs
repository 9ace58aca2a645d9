use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type covering every failure class in the relay.
///
/// Provides structured error information for logging and for the thin HTTP
/// surface. Everything past a successful publish is asynchronous; those
/// failures surface through retry accounting and the dead-letter sink, not
/// through this type's HTTP mapping.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Ingress Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    // ===== Queue & Delivery Errors =====
    #[error("Delivery queue error: {0}")]
    Queue(String),

    #[error("Outbound transport error: {0}")]
    Transport(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Network Errors =====
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Internal Errors =====
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Transport(_) | AppError::Reqwest(_) => StatusCode::BAD_GATEWAY,
            AppError::Queue(_) | AppError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-facing error message without sensitive details.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            AppError::Json(_) => "Malformed request body".to_string(),
            AppError::Queue(_) => "Delivery queue error".to_string(),
            AppError::Redis(_) => "Delivery queue error".to_string(),
            AppError::Transport(_) => "Delivery failed".to_string(),
            AppError::Reqwest(_) => "External service error".to_string(),
            AppError::Config(msg) => format!("Configuration error: {}", msg),
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Queue(_) => "QUEUE_ERROR",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Redis(_) => "REDIS_ERROR",
            AppError::Serialization(_) | AppError::Deserialization(_) => "SERIALIZATION_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Reqwest(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with the appropriate level and context.
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    /// Convert to a hyper response for the plain HTTP handler.
    pub fn to_hyper_response(self) -> Response<Full<Bytes>> {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        // Server errors never expose internal details to clients
        let response_body = if status.is_server_error() {
            json!({
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "error_code": error_code,
                "status": status.as_u16(),
            })
        };

        let json_bytes = serde_json::to_vec(&response_body)
            .unwrap_or_else(|_| b"{\"error\":\"Internal server error\"}".to_vec());

        let mut response = Response::new(Full::new(Bytes::from(json_bytes)));
        *response.status_mut() = status;

        if let Ok(content_type) = "application/json".parse() {
            response.headers_mut().insert("content-type", content_type);
        }

        response
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl AppError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Create a delivery queue error.
    pub fn queue(msg: impl Into<String>) -> Self {
        AppError::Queue(msg.into())
    }

    /// Create an outbound transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        AppError::Transport(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    /// Create an internal server error.
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
