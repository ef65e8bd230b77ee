use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Length of a derived user id in hex characters (64 bits).
pub const USER_ID_LEN: usize = 16;

const SEGMENT_SEPARATOR: char = '.';

/// Derive a stable user id from session-establishment data.
/// `SHA256(session_data || secret_key)`, first 16 hex chars.
pub fn derive_user_id(session_data: &str, secret_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_data.as_bytes());
    hasher.update(secret_key.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(USER_ID_LEN);
    digest
}

/// Decoded contents of a verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: String,
    pub issued_at_ms: i64,
}

/// Mints and verifies HMAC-signed session tokens.
///
/// Wire format: `base64url(payload_json) "." base64url(hmac_sha256(payload_json))`.
/// Both segments use the unpadded URL-safe alphabet, which never contains `.`.
#[derive(Clone)]
pub struct SessionTokenCodec {
    secret_key: String,
    mac: HmacSha256,
    max_age_ms: i64,
}

/// Domain label for the key that signs authorization codes.
const AUTHORIZATION_CODE_KEY_LABEL: &[u8] = b"authorization_code";

impl SessionTokenCodec {
    /// Codec for access tokens, keyed with the server secret.
    pub fn new(config: &AuthConfig) -> Self {
        Self::with_key(
            config.secret_key(),
            config.secret_key().as_bytes(),
            config.token_max_age_ms,
        )
    }

    /// Codec for short-lived authorization codes. The signing key is
    /// `HMAC(secret, "authorization_code")`, so codes never verify as access
    /// tokens and access tokens never verify as codes.
    pub fn for_authorization_codes(config: &AuthConfig) -> Self {
        let mut mac = new_mac(config.secret_key().as_bytes());
        mac.update(AUTHORIZATION_CODE_KEY_LABEL);
        let code_key = mac.finalize().into_bytes();
        Self::with_key(
            config.secret_key(),
            &code_key,
            config.authorization_code_max_age_ms,
        )
    }

    fn with_key(secret_key: &str, signing_key: &[u8], max_age_ms: i64) -> Self {
        Self {
            secret_key: secret_key.to_string(),
            mac: new_mac(signing_key),
            max_age_ms,
        }
    }

    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms
    }

    pub fn derive_user_id(&self, session_data: &str) -> String {
        derive_user_id(session_data, &self.secret_key)
    }

    pub fn mint(&self, user_id: &str) -> String {
        self.mint_at(user_id, now_ms())
    }

    pub fn mint_at(&self, user_id: &str, issued_at_ms: i64) -> String {
        let payload = serde_json::json!({
            "user_id": user_id,
            "issued_at_ms": issued_at_ms,
        })
        .to_string();

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        format!(
            "{}{SEGMENT_SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, now_ms())
    }

    /// Verify `token` as of `now_ms`. The signature is checked before the
    /// payload is parsed, so tampered payloads never reach the JSON decoder.
    pub fn verify_at(&self, token: &str, now_ms: i64) -> Result<SessionClaims, TokenError> {
        let (payload_segment, signature_segment) = token
            .split_once(SEGMENT_SEPARATOR)
            .ok_or(TokenError::Malformed)?;
        if payload_segment.is_empty()
            || signature_segment.is_empty()
            || signature_segment.contains(SEGMENT_SEPARATOR)
        {
            return Err(TokenError::Malformed);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_segment)
            .map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_segment)
            .map_err(|_| TokenError::Malformed)?;

        // verify_slice compares in constant time
        let mut mac = self.mac.clone();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::SignatureMismatch)?;

        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if now_ms.saturating_sub(claims.issued_at_ms) > self.max_age_ms {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length")
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
