use axum::extract::Query;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slack_mcp_runtime::active_members;

use crate::auth::SlackSession;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

const DEFAULT_CHANNEL_TYPES: &str = "public_channel,private_channel";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/slack/channels", get(list_channels))
        .route("/api/slack/search", post(search_messages))
        .route("/api/slack/users", get(list_users))
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

// ──────────────────────────────────────────────
// GET /api/slack/channels
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ChannelsQuery {
    /// Comma-separated conversation types
    #[serde(default)]
    pub types: Option<String>,
    /// 1..=1000, default 100
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ChannelSummary {
    pub id: Option<String>,
    pub name: Option<String>,
    pub is_private: bool,
    pub topic: String,
    pub member_count: Option<u64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ChannelsResponse {
    pub success: bool,
    pub count: usize,
    pub channels: Vec<ChannelSummary>,
}

impl ChannelSummary {
    fn from_slack(channel: &Value) -> Self {
        Self {
            id: str_field(channel, "id"),
            name: str_field(channel, "name"),
            is_private: bool_field(channel, "is_private"),
            topic: channel
                .pointer("/topic/value")
                .and_then(Value::as_str)
                .filter(|topic| !topic.is_empty())
                .unwrap_or("No topic")
                .to_string(),
            member_count: channel.get("num_members").and_then(Value::as_u64),
        }
    }
}

/// List channels visible to the linked Slack token
#[utoipa::path(
    get,
    path = "/api/slack/channels",
    params(ChannelsQuery),
    responses(
        (status = 200, description = "Channels", body = ChannelsResponse),
        (status = 401, description = "Missing or invalid session", body = slack_mcp_core::error::ApiError),
        (status = 502, description = "Slack error", body = slack_mcp_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "slack"
)]
pub async fn list_channels(
    session: SlackSession,
    Query(query): Query<ChannelsQuery>,
) -> Result<Json<ChannelsResponse>, AppError> {
    let types = query
        .types
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_CHANNEL_TYPES);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let body = session
        .slack
        .call(
            "conversations.list",
            &[("types", types.to_string()), ("limit", limit.to_string())],
        )
        .await?;

    let channels: Vec<ChannelSummary> = body
        .get("channels")
        .and_then(Value::as_array)
        .map(|channels| channels.iter().map(ChannelSummary::from_slack).collect())
        .unwrap_or_default();

    tracing::debug!(user_id = %session.user_id, count = channels.len(), "listed channels");
    Ok(Json(ChannelsResponse {
        success: true,
        count: channels.len(),
        channels,
    }))
}

// ──────────────────────────────────────────────
// POST /api/slack/search
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_search_count")]
    pub count: u32,
}

fn default_search_count() -> u32 {
    20
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SearchMatch {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
    pub timestamp: Option<String>,
    pub permalink: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub count: usize,
    pub messages: Vec<SearchMatch>,
}

impl SearchMatch {
    fn from_slack(item: &Value) -> Self {
        Self {
            channel: item
                .pointer("/channel/name")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            user: str_field(item, "username"),
            text: str_field(item, "text"),
            timestamp: str_field(item, "ts"),
            permalink: str_field(item, "permalink"),
        }
    }
}

/// Search messages (requires a user token)
#[utoipa::path(
    post,
    path = "/api/slack/search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Matches", body = SearchResponse),
        (status = 400, description = "Missing query", body = slack_mcp_core::error::ApiError),
        (status = 401, description = "Missing or invalid session", body = slack_mcp_core::error::ApiError),
        (status = 502, description = "Slack error", body = slack_mcp_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "slack"
)]
pub async fn search_messages(
    session: SlackSession,
    AppJson(request): AppJson<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(AppError::Validation {
            message: "Query required".to_string(),
            field: Some("query".to_string()),
            docs_hint: None,
        });
    }
    let count = request.count.clamp(1, 100);

    let body = session
        .slack
        .call(
            "search.messages",
            &[("query", query.clone()), ("count", count.to_string())],
        )
        .await?;

    let messages: Vec<SearchMatch> = body
        .pointer("/messages/matches")
        .and_then(Value::as_array)
        .map(|matches| matches.iter().map(SearchMatch::from_slack).collect())
        .unwrap_or_default();

    Ok(Json(SearchResponse {
        success: true,
        count: messages.len(),
        query,
        messages,
    }))
}

// ──────────────────────────────────────────────
// GET /api/slack/users
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct UsersQuery {
    /// 1..=1000, default 100
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UserSummary {
    pub id: Option<String>,
    pub name: Option<String>,
    pub real_name: Option<String>,
    pub email: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UsersResponse {
    pub success: bool,
    pub count: usize,
    pub users: Vec<UserSummary>,
}

impl UserSummary {
    fn from_slack(user: &Value) -> Self {
        Self {
            id: str_field(user, "id"),
            name: str_field(user, "name"),
            real_name: str_field(user, "real_name"),
            email: user
                .pointer("/profile/email")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            is_bot: bool_field(user, "is_bot"),
        }
    }
}

/// List workspace members, excluding deactivated accounts
#[utoipa::path(
    get,
    path = "/api/slack/users",
    params(UsersQuery),
    responses(
        (status = 200, description = "Users", body = UsersResponse),
        (status = 401, description = "Missing or invalid session", body = slack_mcp_core::error::ApiError),
        (status = 502, description = "Slack error", body = slack_mcp_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "slack"
)]
pub async fn list_users(
    session: SlackSession,
    Query(query): Query<UsersQuery>,
) -> Result<Json<UsersResponse>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let body = session
        .slack
        .call("users.list", &[("limit", limit.to_string())])
        .await?;

    let users: Vec<UserSummary> = active_members(body.get("members"))
        .map(UserSummary::from_slack)
        .collect();

    Ok(Json(UsersResponse {
        success: true,
        count: users.len(),
        users,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::state::test_support::memory_state;

    async fn linked_app(slack: &MockServer) -> (Router, String) {
        let state = memory_state(&slack.uri());
        let issued = state
            .sessions
            .authorize("T1_U1_1", "xoxp-linked")
            .await
            .unwrap();
        (router().with_state(state), issued.token)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("JSON body")
    }

    fn authed_get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request should build")
    }

    #[tokio::test]
    async fn channels_are_compacted_with_topic_fallback() {
        let slack = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .and(header("authorization", "Bearer xoxp-linked"))
            .and(query_param("limit", "1000"))
            .and(query_param("types", "public_channel,private_channel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channels": [
                    {"id": "C1", "name": "general", "is_private": false, "num_members": 12,
                     "topic": {"value": "Company news"}},
                    {"id": "C2", "name": "secret", "is_private": true, "topic": {"value": ""}}
                ]
            })))
            .mount(&slack)
            .await;

        let (app, token) = linked_app(&slack).await;
        let response = app
            .oneshot(authed_get("/api/slack/channels?limit=5000", &token))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        assert_eq!(body["channels"][0]["topic"], "Company news");
        assert_eq!(body["channels"][0]["member_count"], 12);
        assert_eq!(body["channels"][1]["topic"], "No topic");
        assert_eq!(body["channels"][1]["is_private"], true);
    }

    #[tokio::test]
    async fn search_requires_query_and_shapes_matches() {
        let slack = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.messages"))
            .and(query_param("query", "deploy"))
            .and(query_param("count", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": {"matches": [{
                    "channel": {"id": "C1", "name": "ops"},
                    "username": "alice",
                    "text": "deploy done",
                    "ts": "1700000000.000100",
                    "permalink": "https://acme.slack.com/archives/C1/p1700000000000100"
                }]}
            })))
            .mount(&slack)
            .await;

        let (app, token) = linked_app(&slack).await;
        let post = |body: &str| {
            Request::builder()
                .method("POST")
                .uri("/api/slack/search")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request should build")
        };

        let response = app
            .clone()
            .oneshot(post(r#"{"query":"  "}"#))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["field"], "query");

        let response = app
            .oneshot(post(r#"{"query":"deploy"}"#))
            .await
            .expect("request should succeed");
        let body = json_body(response).await;
        assert_eq!(body["query"], "deploy");
        assert_eq!(body["messages"][0]["channel"], "ops");
        assert_eq!(body["messages"][0]["user"], "alice");
        assert_eq!(body["messages"][0]["timestamp"], "1700000000.000100");
    }

    #[tokio::test]
    async fn users_skip_deleted_members() {
        let slack = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "members": [
                    {"id": "U1", "name": "alice", "real_name": "Alice", "profile": {"email": "a@acme.test"}},
                    {"id": "U2", "name": "gone", "deleted": true},
                    {"id": "B1", "name": "bot", "is_bot": true}
                ]
            })))
            .mount(&slack)
            .await;

        let (app, token) = linked_app(&slack).await;
        let response = app
            .oneshot(authed_get("/api/slack/users", &token))
            .await
            .expect("request should succeed");
        let body = json_body(response).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["users"][0]["email"], "a@acme.test");
        assert_eq!(body["users"][1]["is_bot"], true);
    }

    #[tokio::test]
    async fn slack_failures_are_bad_gateway() {
        let slack = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "missing_scope"})),
            )
            .mount(&slack)
            .await;

        let (app, token) = linked_app(&slack).await;
        let response = app
            .oneshot(authed_get("/api/slack/users", &token))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(
            json_body(response).await["message"]
                .as_str()
                .unwrap()
                .contains("Missing required permission scope")
        );
    }

    #[tokio::test]
    async fn requests_without_session_are_rejected() {
        let slack = MockServer::start().await;
        let (app, _) = linked_app(&slack).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/slack/channels")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
