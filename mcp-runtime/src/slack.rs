//! Slack Web API client.
//!
//! Read methods are sent as GET with query parameters, `chat.postMessage`
//! as a form POST. Every call authenticates with the caller's token as a
//! bearer header and fails on `"ok": false` responses.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::util::client;

/// Base URL for the Slack Web API.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("HTTP error! status: {0}")]
    Http(u16),
    #[error("Slack request failed: {0}")]
    Transport(String),
    #[error("{message}")]
    Api { code: String, message: String },
}

impl SlackError {
    /// Slack's `error` code when the API answered `ok: false`.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            SlackError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    User,
    Bot,
    Unknown,
}

impl TokenKind {
    pub fn of(token: &str) -> Self {
        if token.starts_with("xoxp-") {
            TokenKind::User
        } else if token.starts_with("xoxb-") {
            TokenKind::Bot
        } else {
            TokenKind::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::User => "user",
            TokenKind::Bot => "bot",
            TokenKind::Unknown => "unknown",
        }
    }
}

/// Identity reported by `auth.test`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub team_id: String,
    pub user_id: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Clone)]
pub struct SlackClient {
    http: Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    /// Client for the API root at `base_url`, normally [`SLACK_API_BASE`].
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: client(),
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn token_kind(&self) -> TokenKind {
        TokenKind::of(&self.token)
    }

    /// GET `{base}/{method}` with the given query parameters.
    pub async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, SlackError> {
        tracing::debug!(slack_method = %method, "calling Slack API");
        let response = self
            .http
            .get(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .query(params)
            .send()
            .await
            .map_err(|e| SlackError::Transport(e.to_string()))?;
        self.read_body(method, response).await
    }

    /// POST a form-encoded body to `{base}/{method}`.
    pub async fn post_form(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<Value, SlackError> {
        tracing::debug!(slack_method = %method, "posting to Slack API");
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await
            .map_err(|e| SlackError::Transport(e.to_string()))?;
        self.read_body(method, response).await
    }

    async fn read_body(&self, method: &str, response: reqwest::Response) -> Result<Value, SlackError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Http(status.as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| SlackError::Transport(format!("invalid JSON from {method}: {e}")))?;

        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }

        let code = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        let message = self.describe_api_error(method, &code);
        tracing::warn!(slack_method = %method, slack_error = %code, "Slack API call failed");
        Err(SlackError::Api { code, message })
    }

    fn describe_api_error(&self, method: &str, code: &str) -> String {
        match code {
            "not_allowed_token_type" if self.token_kind() == TokenKind::User => format!(
                "This API method ({method}) requires a bot token, but you're using a user token. Some features may be limited."
            ),
            "missing_scope" => format!(
                "Missing required permission scope for {method}. Please check your token permissions."
            ),
            "invalid_auth" => {
                "Invalid authentication. Your token may have expired or been revoked.".to_string()
            }
            other => format!("Slack API error: {other}"),
        }
    }

    pub async fn auth_test(&self) -> Result<AuthIdentity, SlackError> {
        let body = self.call("auth.test", &[]).await?;
        serde_json::from_value(body)
            .map_err(|e| SlackError::Transport(format!("unexpected auth.test response: {e}")))
    }

    /// Resolve `#name` to a channel id; anything else is returned unchanged.
    /// Unknown names are passed through so Slack reports `channel_not_found`.
    pub async fn resolve_channel(&self, channel: &str) -> Result<String, SlackError> {
        let Some(name) = channel.strip_prefix('#') else {
            return Ok(channel.to_string());
        };
        let body = self
            .call(
                "conversations.list",
                &[("types", "public_channel,private_channel".to_string())],
            )
            .await?;
        let found = body
            .get("channels")
            .and_then(Value::as_array)
            .and_then(|channels| {
                channels
                    .iter()
                    .find(|c| c.get("name").and_then(Value::as_str) == Some(name))
            })
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str);
        Ok(found.unwrap_or(channel).to_string())
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
        unfurl_links: bool,
    ) -> Result<Value, SlackError> {
        let mut params = vec![
            ("channel", channel.to_string()),
            ("text", text.to_string()),
            ("unfurl_links", unfurl_links.to_string()),
        ];
        if let Some(ts) = thread_ts {
            params.push(("thread_ts", ts.to_string()));
        }
        self.post_form("chat.postMessage", &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn token_kind_from_prefix() {
        assert_eq!(TokenKind::of("xoxp-1"), TokenKind::User);
        assert_eq!(TokenKind::of("xoxb-1"), TokenKind::Bot);
        assert_eq!(TokenKind::of("other"), TokenKind::Unknown);
    }

    #[tokio::test]
    async fn call_sends_bearer_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.list"))
            .and(header("authorization", "Bearer xoxp-test"))
            .and(query_param("limit", "5"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "members": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let slack = SlackClient::with_base_url("xoxp-test", server.uri());
        let body = slack
            .call("users.list", &[("limit", "5".to_string())])
            .await
            .unwrap();
        assert_eq!(body["members"], json!([]));
    }

    #[tokio::test]
    async fn api_errors_get_friendly_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "not_allowed_token_type"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth.test"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "invalid_auth"})),
            )
            .mount(&server)
            .await;

        let slack = SlackClient::with_base_url("xoxp-test", server.uri());
        let err = slack.call("users.list", &[]).await.unwrap_err();
        assert_eq!(err.api_code(), Some("not_allowed_token_type"));
        assert!(err.to_string().contains("requires a bot token"));

        let err = slack.auth_test().await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid authentication"));
    }

    #[tokio::test]
    async fn http_failure_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let slack = SlackClient::with_base_url("xoxb-test", server.uri());
        let err = slack.call("conversations.list", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP error! status: 502");
    }

    #[tokio::test]
    async fn auth_test_parses_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "team": "Acme",
                "team_id": "T123",
                "user": "alice",
                "user_id": "U456"
            })))
            .mount(&server)
            .await;

        let identity = SlackClient::with_base_url("xoxp-test", server.uri())
            .auth_test()
            .await
            .unwrap();
        assert_eq!(identity.team_id, "T123");
        assert_eq!(identity.user_id, "U456");
        assert_eq!(identity.team.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn resolve_channel_maps_names_to_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channels": [
                    {"id": "C1", "name": "general"},
                    {"id": "C2", "name": "random"}
                ]
            })))
            .mount(&server)
            .await;

        let slack = SlackClient::with_base_url("xoxb-test", server.uri());
        assert_eq!(slack.resolve_channel("#random").await.unwrap(), "C2");
        assert_eq!(slack.resolve_channel("#missing").await.unwrap(), "#missing");
        assert_eq!(slack.resolve_channel("C9").await.unwrap(), "C9");
    }

    #[tokio::test]
    async fn post_message_is_form_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_string_contains("channel=C1"))
            .and(body_string_contains("thread_ts=1700000000.000100"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "ts": "1700000001.000200"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let slack = SlackClient::with_base_url("xoxb-test", server.uri());
        let body = slack
            .post_message("C1", "hello", Some("1700000000.000100"), true)
            .await
            .unwrap();
        assert_eq!(body["ts"], "1700000001.000200");
    }
}
