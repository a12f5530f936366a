use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Pipeline error taxonomy.
///
/// Only `Validation`, `AllSourcesUnauthorized` and `TimedOut` ever escape a
/// `generate` call. The fetch-level variants are absorbed per source by the
/// orchestrator.
#[derive(Debug, Clone)]
pub enum LeadGenError {
    /// Retryable fetch failure (timeout, connection reset, 5xx, 429, rate-limit denial).
    TransientFetch(String),
    /// Credential failure for one source. Never retried.
    Auth {
        /// Name of the source that rejected the credentials.
        source: String,
        /// Upstream detail.
        message: String,
    },
    /// Malformed criteria or request input.
    Validation(String),
    /// Non-retryable upstream failure that is not an auth problem.
    Upstream(String),
    /// Every configured source failed with an auth-class error.
    AllSourcesUnauthorized(Vec<String>),
    /// The caller's budget for the whole run elapsed.
    TimedOut(Duration),
    /// Internal error.
    Internal(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<LeadGenError>,
        /// Additional context message.
        context: String,
    },
}

impl LeadGenError {
    /// Whether the retry policy may try the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LeadGenError::TransientFetch(_) => true,
            LeadGenError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this is a credential failure that should short-circuit a source.
    pub fn is_auth(&self) -> bool {
        match self {
            LeadGenError::Auth { .. } => true,
            LeadGenError::WithContext { source, .. } => source.is_auth(),
            _ => false,
        }
    }

    /// Classifies an HTTP status returned by an external source.
    pub fn from_status(source: &str, status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => LeadGenError::Auth {
                source: source.to_string(),
                message: format!("{} returned {}", source, status),
            },
            408 | 429 => LeadGenError::TransientFetch(format!("{} returned {}", source, status)),
            s if s >= 500 => {
                LeadGenError::TransientFetch(format!("{} returned {}: {}", source, status, body))
            }
            _ => LeadGenError::Upstream(format!("{} returned {}: {}", source, status, body)),
        }
    }
}

impl fmt::Display for LeadGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadGenError::TransientFetch(msg) => write!(f, "Transient fetch error: {}", msg),
            LeadGenError::Auth { source, message } => {
                write!(f, "Authentication failed for {}: {}", source, message)
            }
            LeadGenError::Validation(msg) => write!(f, "Validation error: {}", msg),
            LeadGenError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            LeadGenError::AllSourcesUnauthorized(sources) => write!(
                f,
                "All sources failed authentication: {}",
                sources.join(", ")
            ),
            LeadGenError::TimedOut(budget) => {
                write!(f, "Lead generation exceeded its {:?} budget", budget)
            }
            LeadGenError::Internal(msg) => write!(f, "Internal error: {}", msg),
            LeadGenError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for LeadGenError {}

impl IntoResponse for LeadGenError {
    /// Maps each variant to an HTTP status and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            LeadGenError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            LeadGenError::AllSourcesUnauthorized(sources) => {
                tracing::error!(?sources, "All lead sources rejected their credentials");
                (
                    StatusCode::BAD_GATEWAY,
                    "All lead sources rejected their credentials".to_string(),
                )
            }
            LeadGenError::TimedOut(budget) => {
                tracing::warn!(?budget, "Lead generation timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "Lead generation timed out".to_string(),
                )
            }
            LeadGenError::TransientFetch(msg)
            | LeadGenError::Upstream(msg) => {
                tracing::error!("External source error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            LeadGenError::Auth { source, .. } => {
                tracing::warn!(source = %source, "Source authentication failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            LeadGenError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            LeadGenError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return (**source).clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for LeadGenError {
    /// Timeouts, connection failures and bodies cut off mid-stream are
    /// transient; everything else is a non-retryable upstream failure.
    ///
    /// Source payloads are parsed with `serde_json` after `text()`, so a
    /// reqwest decode error here always comes from the body stream.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout()
            || err.is_connect()
            || err.is_request()
            || err.is_body()
            || err.is_decode()
        {
            return LeadGenError::TransientFetch(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() {
                return LeadGenError::TransientFetch(err.to_string());
            }
        }
        LeadGenError::Upstream(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, LeadGenError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, LeadGenError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, LeadGenError> {
    fn context(self, context: impl Into<String>) -> Result<T, LeadGenError> {
        self.map_err(|e| LeadGenError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, LeadGenError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| LeadGenError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}
