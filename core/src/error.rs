use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Structured error response returned by the REST endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "invalid_token")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about how to recover
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const INVALID_TOKEN: &str = "invalid_token";
    pub const CREDENTIAL_NOT_FOUND: &str = "credential_not_found";
    pub const STORE_UNAVAILABLE: &str = "store_unavailable";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}

/// Why a session token was rejected.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("session token is malformed")]
    Malformed,
    #[error("session token signature does not match")]
    SignatureMismatch,
    #[error("session token has expired")]
    Expired,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Failure to turn a bearer session token into an upstream Slack token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Token verified, but no secret is stored for its user id.
    #[error("no stored credential for user {user_id}")]
    CredentialNotFound { user_id: String },
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}
