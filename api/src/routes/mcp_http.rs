use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{HOST, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use slack_mcp_core::error::{SessionError, codes};

use crate::auth::bearer_token;
use crate::error::AppError;
use crate::state::AppState;

const MCP_PATH: &str = "/mcp";

pub fn router() -> Router<AppState> {
    Router::new().route(MCP_PATH, get(mcp_get).post(mcp_post))
}

/// Discovery documents that describe `/mcp` as a protected resource.
pub fn metadata_router() -> Router<AppState> {
    Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(oauth_protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(oauth_protected_resource_metadata),
        )
}

/// Describe the MCP endpoint
#[utoipa::path(
    get,
    path = "/mcp",
    responses((status = 200, description = "MCP endpoint description and tool names")),
    tag = "mcp"
)]
pub async fn mcp_get() -> Json<Value> {
    Json(json!({
        "name": slack_mcp_runtime::MCP_SERVER_NAME,
        "protocolVersion": slack_mcp_runtime::MCP_PROTOCOL_VERSION,
        "transport": "streamable-http",
        "usage": "POST JSON-RPC 2.0 messages with 'Authorization: Bearer <session token>'",
        "tools": slack_mcp_runtime::tool_names(),
    }))
}

/// JSON-RPC over HTTP
#[utoipa::path(
    post,
    path = "/mcp",
    request_body(description = "JSON-RPC 2.0 request, notification or batch", content_type = "application/json"),
    responses(
        (status = 200, description = "JSON-RPC response or batch of responses"),
        (status = 202, description = "Only notifications were received"),
        (status = 401, description = "Missing or invalid session token"),
        (status = 503, description = "Credential store unavailable", body = slack_mcp_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "mcp"
)]
pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let public_base_url = request_base_url(&headers);
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(description) => {
            return mcp_oauth_challenge(&public_base_url, codes::INVALID_TOKEN, description);
        }
    };

    let resolved = match state.sessions.resolve(&token).await {
        Ok(resolved) => resolved,
        Err(SessionError::Token(reason)) => {
            tracing::info!(event = "mcp_session_rejected", reason = %reason);
            return mcp_oauth_challenge(
                &public_base_url,
                codes::INVALID_TOKEN,
                "Invalid session, please re-authorize",
            );
        }
        Err(SessionError::CredentialNotFound { user_id }) => {
            tracing::info!(event = "mcp_session_unlinked", user_id = %user_id);
            return mcp_oauth_challenge(
                &public_base_url,
                codes::CREDENTIAL_NOT_FOUND,
                "No Slack token is linked to this session, please re-authorize",
            );
        }
        Err(err) => return AppError::from(err).into_response(),
    };

    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {
                        "code": -32700,
                        "message": "Parse error"
                    }
                })),
            )
                .into_response();
        }
    };

    tracing::debug!(event = "mcp_http_request", user_id = %resolved.claims.user_id);
    let responses =
        slack_mcp_runtime::handle_http_jsonrpc(state.slack_client(&resolved.secret), incoming)
            .await;

    let mut responses = responses.into_iter();
    match (responses.next(), responses.next()) {
        (None, _) => StatusCode::ACCEPTED.into_response(),
        (Some(only), None) => (StatusCode::OK, Json(only)).into_response(),
        (Some(first), Some(second)) => {
            let batch: Vec<Value> = [first, second].into_iter().chain(responses).collect();
            (StatusCode::OK, Json(Value::Array(batch))).into_response()
        }
    }
}

async fn oauth_protected_resource_metadata(headers: HeaderMap) -> Json<Value> {
    let base = request_base_url(&headers);
    Json(json!({
        "resource": format!("{base}{MCP_PATH}"),
        "authorization_servers": [base],
        "scopes_supported": ["read", "write"],
        "bearer_methods_supported": ["header"],
    }))
}

/// 401 with a bearer challenge pointing at the resource metadata. The
/// challenge always says `invalid_token` so clients restart authorization;
/// `error_code` in the body tells the failure kinds apart.
fn mcp_oauth_challenge(base_url: &str, error_code: &str, description: &str) -> Response {
    let resource_metadata = format!("{base_url}/.well-known/oauth-protected-resource/mcp");
    let description = description.replace('"', "'");
    let challenge = format!(
        "Bearer realm=\"slack-mcp\", error=\"invalid_token\", error_description=\"{description}\", resource_metadata=\"{resource_metadata}\""
    );
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": error_code,
            "error_description": description,
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(WWW_AUTHENTICATE, value);
    }
    response
}

/// Base URL used when the request carries no usable host.
fn fallback_base_url() -> String {
    if let Ok(value) = std::env::var("PUBLIC_BASE_URL") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.trim_end_matches('/').to_string();
        }
    }
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    format!("http://127.0.0.1:{}", port.trim())
}

/// Public base URL as seen by the client, honoring proxy headers.
pub(crate) fn request_base_url(headers: &HeaderMap) -> String {
    let forwarded_proto = first_header_token(headers, "x-forwarded-proto");
    let forwarded_host = first_header_token(headers, "x-forwarded-host");
    let host = forwarded_host.or_else(|| {
        headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
    });

    if let Some(host) = host {
        let proto = forwarded_proto.unwrap_or_else(|| {
            if host.contains("localhost") || host.starts_with("127.0.0.1") {
                "http".to_string()
            } else {
                "https".to_string()
            }
        });
        return format!("{}://{}", proto.trim_end_matches(':'), host);
    }

    fallback_base_url()
}

pub(crate) fn header_value(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

pub(crate) fn first_header_token(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::state::test_support::memory_state;

    fn app(state: AppState) -> Router {
        Router::new()
            .merge(router())
            .merge(metadata_router())
            .with_state(state)
    }

    fn rpc_post(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("host", "mcp.example.com")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("JSON body")
    }

    #[test]
    fn base_url_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("internal:3000"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("mcp.example.com, proxy"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(request_base_url(&headers), "https://mcp.example.com");

        let mut local = HeaderMap::new();
        local.insert(HOST, HeaderValue::from_static("localhost:3000"));
        assert_eq!(request_base_url(&local), "http://localhost:3000");
    }

    #[tokio::test]
    async fn get_lists_tool_names() {
        let response = app(memory_state("http://127.0.0.1:9"))
            .oneshot(
                Request::builder()
                    .uri("/mcp")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let body = json_body(response).await;
        assert_eq!(body["name"], "slack-mcp-server");
        assert!(
            body["tools"]
                .as_array()
                .unwrap()
                .iter()
                .any(|t| t == "slack_send_message")
        );
    }

    #[tokio::test]
    async fn missing_bearer_gets_resource_metadata_challenge() {
        let response = app(memory_state("http://127.0.0.1:9"))
            .oneshot(rpc_post(None, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .expect("challenge header should exist")
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.contains("realm=\"slack-mcp\""));
        assert!(challenge.contains(
            "resource_metadata=\"https://mcp.example.com/.well-known/oauth-protected-resource/mcp\""
        ));
    }

    #[tokio::test]
    async fn forged_or_unlinked_tokens_are_challenged() {
        let state = memory_state("http://127.0.0.1:9");
        let response = app(state.clone())
            .oneshot(rpc_post(Some("forged.token"), "{}"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "invalid_token");

        let unlinked = state.sessions.codec().mint("abc");
        let response = app(state)
            .oneshot(rpc_post(Some(&unlinked), "{}"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .expect("challenge header should exist")
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.contains("resource_metadata="));
        let body = json_body(response).await;
        assert_eq!(body["error"], "credential_not_found");
        assert!(
            body["error_description"]
                .as_str()
                .unwrap()
                .contains("No Slack token")
        );
    }

    #[tokio::test]
    async fn authorization_codes_are_not_bearer_tokens() {
        let state = memory_state("http://127.0.0.1:9");
        let issued = state.sessions.authorize("T1_U1_1", "xoxp-1").await.unwrap();
        let code = state.sessions.authorization_code(&issued.user_id);

        let response = app(state)
            .oneshot(rpc_post(
                Some(&code),
                r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            ))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "invalid_token");
    }

    #[tokio::test]
    async fn authenticated_requests_reach_the_runtime() {
        let state = memory_state("http://127.0.0.1:9");
        let issued = state.sessions.authorize("T1_U1_1", "xoxp-1").await.unwrap();

        let response = app(state.clone())
            .oneshot(rpc_post(
                Some(&issued.token),
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            ))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["result"]["serverInfo"]["name"], "slack-mcp-server");

        let response = app(state.clone())
            .oneshot(rpc_post(
                Some(&issued.token),
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app(state.clone())
            .oneshot(rpc_post(
                Some(&issued.token),
                r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","id":2,"method":"ping"}]"#,
            ))
            .await
            .expect("request should succeed");
        assert_eq!(json_body(response).await.as_array().map(Vec::len), Some(2));

        let response = app(state)
            .oneshot(rpc_post(Some(&issued.token), "{not json"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn tool_calls_use_the_stored_slack_token() {
        let slack = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .and(header("authorization", "Bearer xoxp-stored"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channels": [{"id": "C1", "name": "general", "is_private": false, "num_members": 3}]
            })))
            .expect(1)
            .mount(&slack)
            .await;

        let state = memory_state(&slack.uri());
        let issued = state
            .sessions
            .authorize("T1_U1_1", "xoxp-stored")
            .await
            .unwrap();

        let response = app(state)
            .oneshot(rpc_post(
                Some(&issued.token),
                r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"slack_list_channels","arguments":{}}}"#,
            ))
            .await
            .expect("request should succeed");
        let body = json_body(response).await;
        assert_eq!(body["id"], 7);
        let text = body["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Found 1 channels:"));
    }

    #[tokio::test]
    async fn protected_resource_points_at_this_server() {
        let response = app(memory_state("http://127.0.0.1:9"))
            .oneshot(
                Request::builder()
                    .uri("/.well-known/oauth-protected-resource")
                    .header("host", "mcp.example.com")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let body = json_body(response).await;
        assert_eq!(body["resource"], "https://mcp.example.com/mcp");
        assert_eq!(body["authorization_servers"][0], "https://mcp.example.com");
    }
}
