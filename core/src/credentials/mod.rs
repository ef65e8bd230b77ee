//! Upstream credential storage.
//!
//! [`CredentialStore`] maps a derived user id to the caller's Slack token
//! inside a generic key-value store ([`KvStore`]). Entries carry a fixed TTL
//! and an expired entry reads exactly like a missing one.
//!
//! Backend failures are always surfaced as [`StoreError::Unavailable`]. The
//! in-memory backend is only used when configured explicitly; it is never
//! substituted for a failing durable store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CREDENTIAL_TTL_SECS;
use crate::error::StoreError;

mod kv_rest;
mod memory;

pub use kv_rest::KvRestStore;
pub use memory::MemoryKvStore;

/// Namespace for stored Slack tokens inside a shared key-value store.
pub const CREDENTIAL_KEY_PREFIX: &str = "slack_token:";

const HEALTH_PROBE_KEY: &str = "slack_mcp:health_probe";

/// Minimal key-value contract: single-key operations with TTL on write.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Short backend label for logs and health output.
    fn backend_name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_ttl(kv, CREDENTIAL_TTL_SECS)
    }

    pub fn with_ttl(kv: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    pub fn backend_name(&self) -> &'static str {
        self.kv.backend_name()
    }

    pub async fn store(&self, user_id: &str, secret: &str) -> Result<(), StoreError> {
        let result = self
            .kv
            .set(&credential_key(user_id), secret, self.ttl_secs)
            .await;
        match &result {
            Ok(()) => tracing::info!(
                event = "credential_stored",
                user_id = %user_id,
                backend = self.backend_name(),
                ttl_secs = self.ttl_secs,
                "Stored upstream credential"
            ),
            Err(err) => tracing::error!(
                event = "credential_store_failed",
                user_id = %user_id,
                backend = self.backend_name(),
                error = %err,
                "Failed to store upstream credential"
            ),
        }
        result
    }

    pub async fn retrieve(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let secret = self.kv.get(&credential_key(user_id)).await?;
        tracing::debug!(
            event = "credential_lookup",
            user_id = %user_id,
            found = secret.is_some(),
            "Looked up upstream credential"
        );
        Ok(secret)
    }

    pub async fn remove(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&credential_key(user_id)).await?;
        tracing::info!(
            event = "credential_removed",
            user_id = %user_id,
            "Removed upstream credential"
        );
        Ok(())
    }

    /// Round-trip a read against the backend to check reachability.
    pub async fn probe(&self) -> Result<(), StoreError> {
        self.kv.get(HEALTH_PROBE_KEY).await.map(|_| ())
    }
}

pub fn credential_key(user_id: &str) -> String {
    format!("{CREDENTIAL_KEY_PREFIX}{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionTokenCodec;
    use crate::config::AuthConfig;

    fn memory_store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(credential_key("abc"), "slack_token:abc");
    }

    #[tokio::test]
    async fn store_then_retrieve() {
        let store = memory_store();
        store.store("u1", "xoxp-secret").await.unwrap();
        assert_eq!(
            store.retrieve("u1").await.unwrap().as_deref(),
            Some("xoxp-secret")
        );
    }

    #[tokio::test]
    async fn retrieve_unknown_user_is_absent_not_error() {
        let store = memory_store();
        assert_eq!(store.retrieve("never-stored").await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_overwrites_previous_secret() {
        let store = memory_store();
        store.store("u1", "old").await.unwrap();
        store.store("u1", "new").await.unwrap();
        assert_eq!(store.retrieve("u1").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = CredentialStore::with_ttl(Arc::new(MemoryKvStore::new()), 0);
        store.store("u1", "xoxp-secret").await.unwrap();
        assert_eq!(store.retrieve("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_makes_entry_absent() {
        let store = memory_store();
        store.store("u1", "xoxp-secret").await.unwrap();
        store.remove("u1").await.unwrap();
        assert_eq!(store.retrieve("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn token_user_id_resolves_stored_secret() {
        let codec = SessionTokenCodec::new(&AuthConfig::new("k"));
        let store = memory_store();

        let token = codec.mint("abc");
        store.store("abc", "xoxp-bound").await.unwrap();

        let claims = codec.verify(&token).unwrap();
        assert_eq!(
            store.retrieve(&claims.user_id).await.unwrap().as_deref(),
            Some("xoxp-bound")
        );
    }

    #[tokio::test]
    async fn probe_succeeds_on_memory_backend() {
        let store = memory_store();
        assert!(store.probe().await.is_ok());
        assert_eq!(store.backend_name(), "memory");
    }
}
