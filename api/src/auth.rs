use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use slack_mcp_runtime::SlackClient;

use crate::error::AppError;
use crate::state::AppState;

/// Caller authenticated by a session token, with a Slack client bound to
/// the upstream token stored for them.
#[derive(Clone)]
pub struct SlackSession {
    pub user_id: String,
    pub slack: SlackClient,
}

impl FromRequestParts<AppState> for SlackSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).map_err(|message| AppError::Unauthorized {
            message: message.to_string(),
            docs_hint: Some(
                "Include 'Authorization: Bearer <session token>'. Obtain one via /oauth/authorize."
                    .to_string(),
            ),
        })?;

        let resolved = state.sessions.resolve(&token).await?;
        Ok(SlackSession {
            slack: state.slack_client(&resolved.secret),
            user_id: resolved.claims.user_id,
        })
    }
}

/// Read the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, &'static str> {
    let Some(raw) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return Err("Missing access token");
    };

    let mut parts = raw.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err("Invalid authorization scheme");
    }
    if token.is_empty() {
        return Err("Missing access token");
    }
    Ok(token.to_string())
}
