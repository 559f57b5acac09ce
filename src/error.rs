use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Selection outcomes
    #[error("No proxy available")]
    NoProxyAvailable,

    // Store errors
    #[error("Proxy store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: i64 },

    #[error("Proxy {address}:{port} already exists")]
    DuplicateEndpoint { address: String, port: u16 },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Source errors
    #[error("Source '{source_name}' failed: {message}")]
    SourceFetch {
        source_name: String,
        message: String,
    },

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PoolError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            PoolError::ProxyNotFound { .. } | PoolError::NoProxyAvailable => StatusCode::NOT_FOUND,

            // 409 Conflict
            PoolError::DuplicateEndpoint { .. } => StatusCode::CONFLICT,

            // 502 Bad Gateway
            PoolError::SourceFetch { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            PoolError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            PoolError::Database(_)
            | PoolError::Configuration(_)
            | PoolError::Io(_)
            | PoolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::StoreUnavailable(_))
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// SQLSTATE for a statement cancelled by `statement_timeout`
const QUERY_CANCELED: &str = "57014";

// Pool exhaustion, I/O failures and statement timeouts mean the store cannot be reached right now.
impl From<sqlx::Error> for PoolError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                PoolError::StoreUnavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some(QUERY_CANCELED) => {
                PoolError::StoreUnavailable(err.to_string())
            }
            sqlx::Error::RowNotFound => PoolError::Internal("row not found".to_string()),
            other => PoolError::Database(other),
        }
    }
}

impl From<url::ParseError> for PoolError {
    fn from(err: url::ParseError) -> Self {
        PoolError::InvalidRequest(err.to_string())
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        });

        (status, Json(body)).into_response()
    }
}
