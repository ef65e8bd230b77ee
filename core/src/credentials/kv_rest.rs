use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::KvStore;
use crate::error::StoreError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Redis-over-REST client (Upstash / Vercel KV wire protocol).
///
/// Each command is a JSON array POSTed to the base URL with a bearer token,
/// answered by `{"result": ...}` or `{"error": "..."}`.
pub struct KvRestStore {
    http: reqwest::Client,
    url: String,
    token: String,
    max_attempts: u32,
    retry_backoff: Duration,
}

enum CommandFailure {
    /// Worth retrying: transport errors, 429, 5xx.
    Transient(String),
    Permanent(String),
}

impl KvRestStore {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, retry_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = retry_backoff;
        self
    }

    async fn command(&self, command: Value) -> Result<Value, StoreError> {
        let name = command
            .get(0)
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        let mut attempt = 1;
        loop {
            match self.send_once(&command).await {
                Ok(result) => return Ok(result),
                Err(CommandFailure::Transient(reason)) if attempt < self.max_attempts => {
                    tracing::warn!(
                        event = "kv_command_retry",
                        command = %name,
                        attempt = attempt,
                        reason = %reason,
                        "KV command failed transiently; retrying"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(CommandFailure::Transient(reason) | CommandFailure::Permanent(reason)) => {
                    tracing::error!(
                        event = "kv_command_failed",
                        command = %name,
                        attempts = attempt,
                        reason = %reason,
                        "KV command failed"
                    );
                    return Err(StoreError::Unavailable(reason));
                }
            }
        }
    }

    async fn send_once(&self, command: &Value) -> Result<Value, CommandFailure> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(command)
            .send()
            .await
            .map_err(|e| CommandFailure::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(CommandFailure::Transient(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CommandFailure::Permanent(format!("invalid response body: {e}")))?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(CommandFailure::Permanent(error.to_string()));
        }
        if !status.is_success() {
            return Err(CommandFailure::Permanent(format!("HTTP {status}")));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl KvStore for KvRestStore {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.command(json!(["SET", key, value, "EX", ttl_secs]))
            .await
            .map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(json!(["GET", key])).await? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.command(json!(["DEL", key])).await.map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "kv_rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> KvRestStore {
        KvRestStore::new(server.uri(), "kv-token")
            .unwrap()
            .with_retry_policy(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn set_sends_ex_ttl_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer kv-token"))
            .and(body_json(json!(["SET", "slack_token:u1", "xoxp-1", "EX", 2592000])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .set("slack_token:u1", "xoxp-1", 2_592_000)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_maps_null_to_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!(["GET", "slack_token:nobody"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
            .mount(&server)
            .await;

        assert_eq!(store(&server).get("slack_token:nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_returns_stored_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!(["GET", "slack_token:u1"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "xoxp-1"})))
            .mount(&server)
            .await;

        assert_eq!(
            store(&server).get("slack_token:u1").await.unwrap().as_deref(),
            Some("xoxp-1")
        );
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = store(&server).get("slack_token:u1").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn command_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "WRONGPASS invalid token"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = store(&server).set("k", "v", 10).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Unavailable("WRONGPASS invalid token".to_string())
        );
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "v"})))
            .mount(&server)
            .await;

        assert_eq!(store(&server).get("k").await.unwrap().as_deref(), Some("v"));
    }
}
