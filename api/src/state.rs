use std::sync::Arc;

use slack_mcp_core::credentials::{KvRestStore, KvStore, MemoryKvStore};
use slack_mcp_core::error::StoreError;
use slack_mcp_core::session::SessionService;
use slack_mcp_runtime::{SLACK_API_BASE, SlackClient};

/// Which key-value backend holds upstream credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialBackend {
    KvRest { url: String, token: String },
    Memory,
}

impl CredentialBackend {
    pub fn from_env() -> Result<Self, String> {
        Self::from_values(
            non_empty_env("CREDENTIAL_STORE"),
            non_empty_env("KV_REST_API_URL"),
            non_empty_env("KV_REST_API_TOKEN"),
        )
    }

    fn from_values(
        choice: Option<String>,
        url: Option<String>,
        token: Option<String>,
    ) -> Result<Self, String> {
        match choice.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("memory") => Ok(Self::Memory),
            Some("kv") | None => match (url, token) {
                (Some(url), Some(token)) => Ok(Self::KvRest { url, token }),
                (Some(_), None) => Err("KV_REST_API_URL is set but KV_REST_API_TOKEN is missing".to_string()),
                (None, _) if choice.is_some() => {
                    Err("CREDENTIAL_STORE=kv requires KV_REST_API_URL and KV_REST_API_TOKEN".to_string())
                }
                (None, _) => Ok(Self::Memory),
            },
            Some(other) => Err(format!(
                "CREDENTIAL_STORE must be 'kv' or 'memory', got '{other}'"
            )),
        }
    }

    pub fn build(self) -> Result<Arc<dyn KvStore>, StoreError> {
        match self {
            Self::KvRest { url, token } => Ok(Arc::new(KvRestStore::new(url, token)?)),
            Self::Memory => Ok(Arc::new(MemoryKvStore::new())),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
    pub slack_api_url: String,
}

impl AppState {
    pub fn new(sessions: SessionService, slack_api_url: impl Into<String>) -> Self {
        Self {
            sessions,
            slack_api_url: slack_api_url.into(),
        }
    }

    /// Slack API base from `SLACK_API_URL`, defaulting to the public API.
    pub fn slack_api_url_from_env() -> String {
        non_empty_env("SLACK_API_URL").unwrap_or_else(|| SLACK_API_BASE.to_string())
    }

    pub fn slack_client(&self, token: &str) -> SlackClient {
        SlackClient::with_base_url(token, &self.slack_api_url)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn kv_is_used_when_url_and_token_are_present() {
        assert_eq!(
            CredentialBackend::from_values(None, s("https://kv.example"), s("t")).unwrap(),
            CredentialBackend::KvRest {
                url: "https://kv.example".to_string(),
                token: "t".to_string()
            }
        );
    }

    #[test]
    fn memory_requires_no_kv_settings() {
        assert_eq!(
            CredentialBackend::from_values(None, None, None).unwrap(),
            CredentialBackend::Memory
        );
        assert_eq!(
            CredentialBackend::from_values(s("MEMORY"), s("https://kv.example"), s("t")).unwrap(),
            CredentialBackend::Memory
        );
    }

    #[test]
    fn incomplete_kv_settings_are_rejected() {
        assert!(CredentialBackend::from_values(s("kv"), None, None).is_err());
        assert!(CredentialBackend::from_values(None, s("https://kv.example"), None).is_err());
        assert!(CredentialBackend::from_values(s("redis"), None, None).is_err());
    }
}
