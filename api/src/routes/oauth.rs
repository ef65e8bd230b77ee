use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use slack_mcp_core::error::SessionError;
use slack_mcp_runtime::SlackError;
use url::Url;

use super::mcp_http::{first_header_token, header_value, request_base_url};
use crate::auth::bearer_token;
use crate::error::AppError;
use crate::state::AppState;

/// The single registered OAuth client.
pub const OAUTH_CLIENT_ID: &str = "slack-mcp-server";
const OAUTH_SCOPES: [&str; 2] = ["read", "write"];
const GRANTED_SCOPE: &str = "read write";

pub fn metadata_router() -> Router<AppState> {
    Router::new()
        .route("/oauth/config", get(oauth_config))
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth_config),
        )
        .route(
            "/.well-known/oauth-authorization-server/mcp",
            get(oauth_config),
        )
        .layer(axum::middleware::from_fn(log_oauth_http_flow))
}

pub fn authorize_router() -> Router<AppState> {
    Router::new()
        .route(
            "/oauth/authorize",
            get(authorize_form).post(authorize_submit),
        )
        .layer(axum::middleware::from_fn(log_oauth_http_flow))
}

pub fn token_router() -> Router<AppState> {
    Router::new()
        .route("/oauth/token", post(token))
        .route("/oauth/revoke", post(revoke))
        .layer(axum::middleware::from_fn(log_oauth_http_flow))
}

async fn log_oauth_http_flow(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let origin = header_value(req.headers(), "origin");
    let user_agent = header_value(req.headers(), "user-agent");
    let forwarded_for = first_header_token(req.headers(), "x-forwarded-for");
    let content_type = header_value(req.headers(), "content-type");

    tracing::info!(
        event = "oauth_http_request",
        method = %method,
        path = %path,
        origin = ?origin,
        user_agent = ?user_agent,
        forwarded_for = ?forwarded_for,
        content_type = ?content_type,
        "OAuth HTTP request received"
    );

    let response = next.run(req).await;

    tracing::info!(
        event = "oauth_http_response",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "OAuth HTTP response sent"
    );

    response
}

// ──────────────────────────────────────────────
// GET /oauth/config
// ──────────────────────────────────────────────

/// OAuth authorization server metadata
#[utoipa::path(
    get,
    path = "/oauth/config",
    responses((status = 200, description = "OAuth metadata")),
    tag = "oauth"
)]
pub async fn oauth_config(headers: HeaderMap) -> Json<Value> {
    let base = request_base_url(&headers);
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "revocation_endpoint": format!("{base}/oauth/revoke"),
        "client_id": OAUTH_CLIENT_ID,
        "scopes": OAUTH_SCOPES,
        "scopes_supported": OAUTH_SCOPES,
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none"],
    }))
}

// ──────────────────────────────────────────────
// GET /oauth/authorize
// ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
}

/// Form asking the user for their Slack token
#[utoipa::path(
    get,
    path = "/oauth/authorize",
    params(AuthorizeParams),
    responses(
        (status = 200, description = "Authorization form HTML"),
        (status = 400, description = "Invalid parameters", body = slack_mcp_core::error::ApiError)
    ),
    tag = "oauth"
)]
pub async fn authorize_form(Query(params): Query<AuthorizeParams>) -> Result<Html<String>, AppError> {
    if let Some(response_type) = params.response_type.as_deref() {
        if response_type != "code" {
            return Err(AppError::Validation {
                message: "response_type must be 'code'".to_string(),
                field: Some("response_type".to_string()),
                docs_hint: Some("Only the authorization code flow is supported.".to_string()),
            });
        }
    }
    parse_redirect_uri(params.redirect_uri.as_deref())?;
    note_client_id(params.client_id.as_deref());

    Ok(Html(render_authorize_form(
        params.client_id.as_deref().unwrap_or(OAUTH_CLIENT_ID),
        params.redirect_uri.as_deref().unwrap_or(""),
        params.state.as_deref().unwrap_or(""),
        None,
    )))
}

/// Accept https redirects anywhere, plain http only on loopback.
fn parse_redirect_uri(redirect_uri: Option<&str>) -> Result<Option<Url>, AppError> {
    let Some(raw) = redirect_uri.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let invalid = |message: &str| AppError::Validation {
        message: message.to_string(),
        field: Some("redirect_uri".to_string()),
        docs_hint: Some("Use an absolute https URI, or http on localhost.".to_string()),
    };

    let parsed = Url::parse(raw).map_err(|_| invalid("redirect_uri is invalid"))?;
    let is_https = parsed.scheme() == "https";
    let is_loopback_http = parsed.scheme() == "http"
        && matches!(
            parsed.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        );
    if !is_https && !is_loopback_http {
        return Err(invalid("redirect_uri must use https or loopback http"));
    }
    Ok(Some(parsed))
}

fn note_client_id(client_id: Option<&str>) {
    if let Some(client_id) = client_id.filter(|id| *id != OAUTH_CLIENT_ID) {
        tracing::warn!(
            event = "oauth_unregistered_client_id",
            client_id = %client_id,
            "OAuth request names a client other than the registered one"
        );
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

const PAGE_STYLE: &str = r#"<style>
body { font-family: system-ui, sans-serif; max-width: 460px; margin: 60px auto; padding: 0 20px; }
h1 { font-size: 1.4em; }
label { display: block; margin-top: 12px; font-weight: 500; }
input[type="password"], textarea { width: 100%; padding: 8px; margin-top: 4px; box-sizing: border-box; font-family: monospace; }
button { margin-top: 20px; padding: 10px 24px; background: #4a154b; color: #fff; border: none; cursor: pointer; font-size: 1em; }
.info { color: #666; font-size: 0.9em; margin-top: 8px; }
.error { color: #b00020; }
</style>"#;

fn render_authorize_form(
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    error: Option<&str>,
) -> String {
    let error_html = error
        .map(|message| format!(r#"<p class="error">{}</p>"#, html_escape(message)))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Slack MCP Server: Authorize</title>
{PAGE_STYLE}
</head>
<body>
<h1>Connect {client_id_escaped} to Slack</h1>
<p class="info">Paste a Slack user token (xoxp-) or bot token (xoxb-). It is stored server-side for 30 days and never returned to the client.</p>
{error_html}
<form method="POST" action="/oauth/authorize">
<input type="hidden" name="client_id" value="{client_id_escaped}">
<input type="hidden" name="redirect_uri" value="{redirect_uri_escaped}">
<input type="hidden" name="state" value="{state_escaped}">
<label>Slack token<input type="password" name="slack_token" required autofocus autocomplete="off"></label>
<button type="submit">Authorize</button>
</form>
</body>
</html>"#,
        client_id_escaped = html_escape(client_id),
        redirect_uri_escaped = html_escape(redirect_uri),
        state_escaped = html_escape(state),
    )
}

fn render_token_page(token: &str, expires_in_secs: i64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Slack MCP Server: Session token</title>
{PAGE_STYLE}
</head>
<body>
<h1>Slack connected</h1>
<p class="info">Use this session token as <code>Authorization: Bearer &lt;token&gt;</code>. It expires in {hours} hours.</p>
<textarea rows="6" readonly>{token_escaped}</textarea>
</body>
</html>"#,
        hours = expires_in_secs / 3600,
        token_escaped = html_escape(token),
    )
}

// ──────────────────────────────────────────────
// POST /oauth/authorize
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AuthorizeSubmit {
    #[serde(default)]
    pub slack_token: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Validate the Slack token, store it and issue a session token
#[utoipa::path(
    post,
    path = "/oauth/authorize",
    request_body(content = AuthorizeSubmit, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 302, description = "Redirect to client with the session token as code"),
        (status = 200, description = "Session token page when no redirect_uri was given"),
        (status = 400, description = "Slack rejected the token", body = slack_mcp_core::error::ApiError),
        (status = 503, description = "Credential store unavailable", body = slack_mcp_core::error::ApiError)
    ),
    tag = "oauth"
)]
pub async fn authorize_submit(
    State(state): State<AppState>,
    Form(form): Form<AuthorizeSubmit>,
) -> Result<Response, AppError> {
    let redirect = parse_redirect_uri(form.redirect_uri.as_deref())?;
    note_client_id(form.client_id.as_deref());

    let slack_token = form.slack_token.trim();
    if slack_token.is_empty() {
        return Err(AppError::Validation {
            message: "slack_token is required".to_string(),
            field: Some("slack_token".to_string()),
            docs_hint: Some("Paste a Slack token starting with xoxp- or xoxb-.".to_string()),
        });
    }

    let identity = state
        .slack_client(slack_token)
        .auth_test()
        .await
        .map_err(|err| match err {
            SlackError::Api { message, .. } => AppError::Validation {
                message: format!("Slack rejected the token: {message}"),
                field: Some("slack_token".to_string()),
                docs_hint: Some("Check that the token is current and copied in full.".to_string()),
            },
            other => AppError::Upstream(other),
        })?;

    let session_data = format!(
        "{}_{}_{}",
        identity.team_id,
        identity.user_id,
        chrono::Utc::now().timestamp_millis()
    );
    let issued = state.sessions.authorize(&session_data, slack_token).await?;

    tracing::info!(
        event = "oauth_authorized",
        user_id = %issued.user_id,
        team_id = %identity.team_id,
        redirect = redirect.is_some(),
        "Slack token linked to new session"
    );

    let Some(mut redirect_url) = redirect else {
        let expires_in = state.sessions.codec().max_age_ms() / 1000;
        return Ok(Html(render_token_page(&issued.token, expires_in)).into_response());
    };

    let code = state.sessions.authorization_code(&issued.user_id);
    redirect_url.query_pairs_mut().append_pair("code", &code);
    if let Some(client_state) = form.state.as_deref().filter(|s| !s.is_empty()) {
        redirect_url
            .query_pairs_mut()
            .append_pair("state", client_state);
    }

    let location = HeaderValue::from_str(redirect_url.as_str())
        .map_err(|e| AppError::Internal(format!("redirect location is not a header value: {e}")))?;
    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}

// ──────────────────────────────────────────────
// POST /oauth/token
// ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

/// Exchange an authorization code for an access token
#[utoipa::path(
    post,
    path = "/oauth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "OAuth error (invalid_request, unsupported_grant_type, invalid_grant)"),
        (status = 503, description = "Credential store unavailable")
    ),
    tag = "oauth"
)]
pub async fn token(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = match parse_body_params(&headers, &body).map(TokenRequest::from_params) {
        Ok(request) => request,
        Err(message) => {
            return oauth_error_response(StatusCode::BAD_REQUEST, "invalid_request", &message, None);
        }
    };

    if request.grant_type != "authorization_code" {
        return oauth_error_response(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "Only grant_type=authorization_code is supported.",
            None,
        );
    }
    let Some(code) = request.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
        return oauth_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Missing required field 'code'",
            None,
        );
    };
    note_client_id(request.client_id.as_deref());

    let issued = match state.sessions.exchange_code(code).await {
        Ok(issued) => issued,
        Err(err) => return session_error_to_oauth_response(err),
    };

    tracing::info!(
        event = "oauth_token_issued",
        user_id = %issued.user_id,
        "Exchanged authorization code for access token"
    );

    (
        StatusCode::OK,
        Json(TokenResponse {
            access_token: issued.token,
            token_type: "bearer".to_string(),
            expires_in: state.sessions.codec().max_age_ms() / 1000,
            scope: GRANTED_SCOPE.to_string(),
        }),
    )
        .into_response()
}

impl TokenRequest {
    fn from_params(mut params: HashMap<String, String>) -> Self {
        Self {
            grant_type: params.remove("grant_type").unwrap_or_default(),
            code: params.remove("code"),
            client_id: params.remove("client_id"),
            redirect_uri: params.remove("redirect_uri"),
        }
    }
}

// ──────────────────────────────────────────────
// POST /oauth/revoke
// ──────────────────────────────────────────────

/// Delete the Slack token bound to a session token
#[utoipa::path(
    post,
    path = "/oauth/revoke",
    request_body(
        content = String,
        content_type = "application/x-www-form-urlencoded",
        description = "`token=<session token>`; a bearer Authorization header is accepted instead"
    ),
    responses(
        (status = 200, description = "Revoked, or token unknown"),
        (status = 400, description = "No token supplied"),
        (status = 503, description = "Credential store unavailable")
    ),
    tag = "oauth"
)]
pub async fn revoke(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let from_body = parse_body_params(&headers, &body)
        .ok()
        .and_then(|mut params| params.remove("token"))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    let Some(token) = from_body.or_else(|| bearer_token(&headers).ok()) else {
        return oauth_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Missing required field 'token'",
            None,
        );
    };

    match state.sessions.revoke(&token).await {
        Ok(claims) => {
            tracing::info!(event = "oauth_revoked", user_id = %claims.user_id);
            StatusCode::OK.into_response()
        }
        // RFC 7009: unknown or invalid tokens are not an error.
        Err(SessionError::Token(_) | SessionError::CredentialNotFound { .. }) => {
            StatusCode::OK.into_response()
        }
        Err(err @ SessionError::StoreUnavailable(_)) => session_error_to_oauth_response(err),
    }
}

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

/// Read a JSON or form-encoded body into string parameters.
fn parse_body_params(headers: &HeaderMap, body: &[u8]) -> Result<HashMap<String, String>, String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let looks_like_json = body
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{');
    if content_type.contains("application/json") || (content_type.is_empty() && looks_like_json) {
        let value: Value =
            serde_json::from_slice(body).map_err(|_| "Invalid JSON request body.".to_string())?;
        let object = value
            .as_object()
            .ok_or_else(|| "Request body must be a JSON object.".to_string())?;
        return Ok(object
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
            .collect());
    }

    Ok(url::form_urlencoded::parse(body).into_owned().collect())
}

fn session_error_to_oauth_response(err: SessionError) -> Response {
    match err {
        SessionError::Token(reason) => {
            tracing::info!(event = "oauth_grant_rejected", reason = %reason);
            oauth_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "Authorization code is invalid or expired.",
                None,
            )
        }
        SessionError::CredentialNotFound { user_id } => {
            tracing::info!(event = "oauth_grant_rejected", user_id = %user_id, reason = "credential_not_found");
            oauth_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "No Slack token is linked to this authorization code. Authorize again.",
                None,
            )
        }
        SessionError::StoreUnavailable(store) => {
            tracing::error!(event = "oauth_store_unavailable", error = %store);
            oauth_error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily_unavailable",
                "Credential store is temporarily unavailable.",
                Some(5),
            )
        }
    }
}

fn oauth_error_response(
    status: StatusCode,
    code: &str,
    description: &str,
    retry_after: Option<u64>,
) -> Response {
    let mut response = (
        status,
        Json(json!({
            "error": code,
            "error_description": description,
        })),
    )
        .into_response();

    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(seconds));
    }

    response
}
