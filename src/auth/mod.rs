//! Account/auth service client
//!
//! The account service owns identity and cosmetics. We consult it once
//! per connection and cache the answer; the anti-cheat layer reads the
//! cached user on every cosmetic RPC.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;

/// Account record returned by the auth service.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    /// Cosmetic item ids the account owns.
    #[serde(default)]
    pub owned_cosmetics: Vec<u32>,
}

/// Auth service client. Lookups are idempotent and cached per
/// connection, so repeated anti-cheat checks never re-hit the service.
#[derive(Clone)]
pub struct AuthApi {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    cache: Arc<DashMap<u32, Option<Arc<User>>>>,
}

impl AuthApi {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.auth_base_url.clone(),
            api_token: config.auth_api_token.clone(),
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Resolve the account behind a connection. `None` means the client
    /// connected anonymously or the token did not verify.
    pub async fn connection_user(
        &self,
        client_id: u32,
        auth_token: &str,
    ) -> Result<Option<Arc<User>>, AuthError> {
        if let Some(cached) = self.cache.get(&client_id) {
            return Ok(cached.clone());
        }

        if auth_token.is_empty() {
            self.cache.insert(client_id, None);
            return Ok(None);
        }

        let url = format!("{}/v1/connections/user", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .header("X-Connection-Token", auth_token)
            .send()
            .await
            .map_err(AuthError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            self.cache.insert(client_id, None);
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api { status: status.as_u16(), body });
        }

        let user: User = response.json().await.map_err(AuthError::Parse)?;
        let user = Arc::new(user);
        self.cache.insert(client_id, Some(user.clone()));
        Ok(Some(user))
    }

    /// Read a previously resolved user without touching the network.
    pub fn cached_user(&self, client_id: u32) -> Option<Arc<User>> {
        self.cache.get(&client_id).and_then(|entry| entry.clone())
    }

    /// Drop the cache entry when the connection goes away.
    pub fn forget(&self, client_id: u32) {
        self.cache.remove(&client_id);
    }
}

/// Auth service errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_user_is_none_until_resolved() {
        let api = AuthApi {
            client: reqwest::Client::new(),
            base_url: "http://localhost:0".into(),
            api_token: "t".into(),
            cache: Arc::new(DashMap::new()),
        };
        assert!(api.cached_user(1).is_none());
    }

    #[tokio::test]
    async fn anonymous_connections_short_circuit() {
        let api = AuthApi {
            client: reqwest::Client::new(),
            base_url: "http://localhost:0".into(),
            api_token: "t".into(),
            cache: Arc::new(DashMap::new()),
        };
        // No token: resolves to None without a network round trip.
        let user = api.connection_user(7, "").await.unwrap();
        assert!(user.is_none());
        assert!(api.cached_user(7).is_none());

        api.forget(7);
        assert!(api.cached_user(7).is_none());
    }
}
