use axum::Json;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use slack_mcp_core::error::{self, ApiError, SessionError, StoreError, TokenError};
use slack_mcp_runtime::SlackError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        docs_hint: Option<String>,
    },
    /// Missing or unusable credentials (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Session token failed verification (401)
    InvalidSession(TokenError),
    /// Session token verified but no Slack token is stored for it (401)
    CredentialNotFound { user_id: String },
    /// Credential backend unreachable (503)
    StoreUnavailable(String),
    /// Slack answered with an error or could not be reached (502)
    Upstream(SlackError),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let mut challenge = None;

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized { message, docs_hint } => {
                challenge = Some(bearer_challenge("invalid_request", &message));
                (
                    StatusCode::UNAUTHORIZED,
                    ApiError {
                        error: error::codes::UNAUTHORIZED.to_string(),
                        message,
                        field: None,
                        request_id,
                        docs_hint,
                    },
                )
            }
            AppError::InvalidSession(reason) => {
                tracing::info!(event = "session_token_rejected", reason = %reason);
                challenge = Some(bearer_challenge("invalid_token", &reason.to_string()));
                (
                    StatusCode::UNAUTHORIZED,
                    ApiError {
                        error: error::codes::INVALID_TOKEN.to_string(),
                        message: "Invalid session, please re-authorize".to_string(),
                        field: None,
                        request_id,
                        docs_hint: Some(
                            "Start a new authorization at /oauth/authorize to obtain a fresh session token."
                                .to_string(),
                        ),
                    },
                )
            }
            AppError::CredentialNotFound { user_id } => {
                tracing::info!(event = "session_credential_missing", user_id = %user_id);
                (
                    StatusCode::UNAUTHORIZED,
                    ApiError {
                        error: error::codes::CREDENTIAL_NOT_FOUND.to_string(),
                        message: "No Slack token is linked to this session".to_string(),
                        field: None,
                        request_id,
                        docs_hint: Some(
                            "Re-link your Slack token at /oauth/authorize; the stored token expired or was revoked."
                                .to_string(),
                        ),
                    },
                )
            }
            AppError::StoreUnavailable(reason) => {
                tracing::error!(event = "credential_store_unavailable", reason = %reason);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError {
                        error: error::codes::STORE_UNAVAILABLE.to_string(),
                        message: "Credential store is temporarily unavailable".to_string(),
                        field: None,
                        request_id,
                        docs_hint: Some("Retry the request shortly.".to_string()),
                    },
                )
            }
            AppError::Upstream(err) => {
                tracing::warn!(
                    event = "slack_upstream_error",
                    slack_error = ?err.api_code(),
                    error = %err
                );
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::UPSTREAM_ERROR.to_string(),
                        message: err.to_string(),
                        field: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        let mut response = (status, Json(api_error)).into_response();
        if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

fn bearer_challenge(code: &str, description: &str) -> String {
    let description = description.replace('"', "'");
    format!("Bearer realm=\"slack-mcp\", error=\"{code}\", error_description=\"{description}\"")
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Token(reason) => AppError::InvalidSession(reason),
            SessionError::CredentialNotFound { user_id } => AppError::CredentialNotFound { user_id },
            SessionError::StoreUnavailable(store) => store.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => AppError::StoreUnavailable(reason),
        }
    }
}

impl From<SlackError> for AppError {
    fn from(err: SlackError) -> Self {
        AppError::Upstream(err)
    }
}
