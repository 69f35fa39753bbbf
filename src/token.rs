//! Bearer token cache for the Microsoft backend.
//!
//! Tokens live in two tiers: process memory and the persisted key-value
//! store. Expiry comes from the `exp` claim embedded in the token itself.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::TranslateError;
use crate::storage::{keys, KeyValueStore};
use crate::translate::BackendId;

/// A token is refreshed this long before its claimed expiry
pub const EXPIRATION_BUFFER_MS: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at_ms: i64,
}

impl CachedToken {
    pub fn from_token(token: String) -> Self {
        let expires_at_ms = expiry_ms(&token);
        Self { token, expires_at_ms }
    }

    pub fn is_usable(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms + EXPIRATION_BUFFER_MS
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Decode the `exp` claim (seconds) from the token's payload segment.
pub fn decode_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.exp
}

/// Expiry in epoch milliseconds; undecodable tokens count as already expired.
pub fn expiry_ms(token: &str) -> i64 {
    match decode_expiry(token) {
        Some(exp) => exp.saturating_mul(1000),
        None => {
            warn!("Could not decode Microsoft token expiry, treating it as expired");
            0
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct TokenCache {
    client: Client,
    auth_endpoint: String,
    store: Arc<dyn KeyValueStore>,
    memory: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(client: Client, auth_endpoint: String, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            client,
            auth_endpoint,
            store,
            memory: Mutex::new(None),
        }
    }

    /// Return a usable token, touching the store or the network only when needed.
    ///
    /// The memory slot stays locked for the whole lookup so concurrent callers
    /// share one refresh.
    pub async fn get_token(&self) -> Result<String, TranslateError> {
        let mut memory = self.memory.lock().await;
        let now = now_ms();

        if let Some(cached) = memory.as_ref().filter(|c| c.is_usable(now)) {
            debug!("Using in-memory Microsoft token");
            return Ok(cached.token.clone());
        }

        if let Some(stored) = self.load_persisted().await {
            if stored.is_usable(now) {
                debug!("Using persisted Microsoft token");
                let token = stored.token.clone();
                *memory = Some(stored);
                return Ok(token);
            }
        }

        info!("Fetching new Microsoft token");
        let fresh = self.fetch().await?;

        if let Err(e) = self.store.set(keys::MS_AUTH_TOKEN, &fresh.token).await {
            warn!("Failed to persist Microsoft token: {}", e);
        }

        match Utc.timestamp_millis_opt(fresh.expires_at_ms).single() {
            Some(at) => info!("Microsoft token acquired, expires at {}", at),
            None => info!("Microsoft token acquired"),
        }

        let token = fresh.token.clone();
        *memory = Some(fresh);
        Ok(token)
    }

    /// Current in-memory entry, if any
    pub async fn cached(&self) -> Option<CachedToken> {
        self.memory.lock().await.clone()
    }

    async fn load_persisted(&self) -> Option<CachedToken> {
        match self.store.get(keys::MS_AUTH_TOKEN).await {
            Ok(Some(token)) if !token.is_empty() => Some(CachedToken::from_token(token)),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read persisted Microsoft token: {}", e);
                None
            }
        }
    }

    async fn fetch(&self) -> Result<CachedToken, TranslateError> {
        let response = self
            .client
            .get(&self.auth_endpoint)
            .send()
            .await
            .map_err(|e| TranslateError::network(BackendId::Microsoft, &e))?;

        if !response.status().is_success() {
            return Err(TranslateError::TokenFetch {
                status: response.status().as_u16(),
            });
        }

        let token = response
            .text()
            .await
            .map_err(|e| TranslateError::network(BackendId::Microsoft, &e))?;

        Ok(CachedToken::from_token(token.trim().to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    /// Unsigned JWT-shaped token expiring `exp` seconds since the epoch
    pub(crate) fn make_token(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{},"region":"global"}}"#, exp));
        format!("{}.{}.signature", header, payload)
    }

    fn in_one_hour() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_decode_expiry() {
        assert_eq!(decode_expiry(&make_token(1_700_000_000)), Some(1_700_000_000));
    }

    #[test]
    fn test_decode_failure_is_expired() {
        assert_eq!(decode_expiry("not-a-token"), None);
        assert_eq!(decode_expiry("a.!!!.c"), None);
        let no_exp = format!("h.{}.s", URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#));
        assert_eq!(decode_expiry(&no_exp), None);
        assert_eq!(expiry_ms("garbage"), 0);
    }

    #[test]
    fn test_buffer_applies_to_usability() {
        let token = CachedToken {
            token: "t".to_string(),
            expires_at_ms: 10_000,
        };
        assert!(token.is_usable(8_999));
        assert!(!token.is_usable(9_000));
        assert!(!token.is_usable(10_000));
    }

    #[tokio::test]
    async fn test_second_call_uses_memory() {
        let mut server = mockito::Server::new_async().await;
        let token = make_token(in_one_hour());
        let mock = server
            .mock("GET", "/auth")
            .with_status(200)
            .with_body(&token)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let cache = TokenCache::new(Client::new(), format!("{}/auth", server.url()), store.clone());

        assert_eq!(cache.get_token().await, Ok(token.clone()));
        assert_eq!(cache.get_token().await, Ok(token.clone()));

        mock.assert_async().await;
        assert_eq!(store.get(keys::MS_AUTH_TOKEN).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_persisted_token_survives_restart() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/auth").expect(0).create_async().await;

        let token = make_token(in_one_hour());
        let store = Arc::new(MemoryStore::new());
        store.set(keys::MS_AUTH_TOKEN, &token).await.unwrap();

        let cache = TokenCache::new(Client::new(), format!("{}/auth", server.url()), store);
        assert_eq!(cache.cached().await, None);

        assert_eq!(cache.get_token().await, Ok(token.clone()));
        assert_eq!(cache.cached().await.map(|c| c.token), Some(token));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_persisted_token_is_refreshed() {
        let mut server = mockito::Server::new_async().await;
        let fresh = make_token(in_one_hour());
        let mock = server
            .mock("GET", "/auth")
            .with_body(&fresh)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        store
            .set(keys::MS_AUTH_TOKEN, &make_token(Utc::now().timestamp() - 60))
            .await
            .unwrap();

        let cache = TokenCache::new(Client::new(), format!("{}/auth", server.url()), store.clone());
        assert_eq!(cache.get_token().await, Ok(fresh.clone()));
        assert_eq!(store.get(keys::MS_AUTH_TOKEN).await.unwrap(), Some(fresh));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/auth").with_status(429).create_async().await;

        let cache = TokenCache::new(
            Client::new(),
            format!("{}/auth", server.url()),
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(
            cache.get_token().await,
            Err(TranslateError::TokenFetch { status: 429 })
        );
    }

    #[tokio::test]
    async fn test_undecodable_token_is_returned_but_not_reused() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/auth")
            .with_body("opaque-token")
            .expect(2)
            .create_async()
            .await;

        let cache = TokenCache::new(
            Client::new(),
            format!("{}/auth", server.url()),
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(cache.get_token().await, Ok("opaque-token".to_string()));
        assert_eq!(cache.get_token().await, Ok("opaque-token".to_string()));
        mock.assert_async().await;
    }
}
