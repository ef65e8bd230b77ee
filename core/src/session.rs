//! Session issuance and resolution on top of the token codec and the
//! credential store.

use crate::auth::{SessionClaims, SessionTokenCodec};
use crate::config::AuthConfig;
use crate::credentials::CredentialStore;
use crate::error::{SessionError, StoreError};

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub user_id: String,
    pub token: String,
}

/// A verified session together with the upstream secret bound to it.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub claims: SessionClaims,
    pub secret: String,
}

impl std::fmt::Debug for ResolvedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSession")
            .field("claims", &self.claims)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct SessionService {
    codec: SessionTokenCodec,
    codes: SessionTokenCodec,
    credentials: CredentialStore,
}

impl SessionService {
    pub fn new(config: &AuthConfig, credentials: CredentialStore) -> Self {
        Self {
            codec: SessionTokenCodec::new(config),
            codes: SessionTokenCodec::for_authorization_codes(config),
            credentials,
        }
    }

    pub fn codec(&self) -> &SessionTokenCodec {
        &self.codec
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Derive the user id, persist the upstream secret, then mint a token.
    /// No token is minted when the secret could not be stored.
    pub async fn authorize(
        &self,
        session_data: &str,
        secret: &str,
    ) -> Result<IssuedSession, StoreError> {
        let user_id = self.codec.derive_user_id(session_data);
        self.credentials.store(&user_id, secret).await?;
        let token = self.codec.mint(&user_id);
        tracing::info!(event = "session_issued", user_id = %user_id, "Issued session token");
        Ok(IssuedSession { user_id, token })
    }

    /// Short-lived code handed to the client's redirect URI. It is only
    /// accepted by [`Self::exchange_code`], never as a bearer token.
    pub fn authorization_code(&self, user_id: &str) -> String {
        self.codes.mint(user_id)
    }

    /// Trade an authorization code for an access token. The code must still
    /// be within its lifetime and its user must have a stored credential.
    pub async fn exchange_code(&self, code: &str) -> Result<IssuedSession, SessionError> {
        let claims = self.codes.verify(code).inspect_err(|err| {
            tracing::info!(event = "authorization_code_rejected", reason = %err);
        })?;
        if self.credentials.retrieve(&claims.user_id).await?.is_none() {
            return Err(SessionError::CredentialNotFound {
                user_id: claims.user_id,
            });
        }
        let token = self.codec.mint(&claims.user_id);
        Ok(IssuedSession {
            user_id: claims.user_id,
            token,
        })
    }

    /// Verify `token` and look up the secret it is bound to.
    pub async fn resolve(&self, token: &str) -> Result<ResolvedSession, SessionError> {
        let claims = self.codec.verify(token).inspect_err(|err| {
            tracing::info!(event = "session_rejected", reason = %err, "Session token rejected");
        })?;
        match self.credentials.retrieve(&claims.user_id).await? {
            Some(secret) => Ok(ResolvedSession { claims, secret }),
            None => {
                tracing::info!(
                    event = "session_credential_missing",
                    user_id = %claims.user_id,
                    "Session token is valid but no credential is stored"
                );
                Err(SessionError::CredentialNotFound {
                    user_id: claims.user_id,
                })
            }
        }
    }

    /// Delete the credential behind `token`. The token itself stays
    /// verifiable until it expires but no longer resolves.
    pub async fn revoke(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let claims = self.codec.verify(token)?;
        self.credentials.remove(&claims.user_id).await?;
        Ok(claims)
    }
}
