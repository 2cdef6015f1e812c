//! Metrics/persistence sink client
//!
//! Receives infraction batches and answers game-id lookups. Inserts are
//! idempotent on the infraction id, so a retried flush never double
//! counts.

use serde::Deserialize;
use uuid::Uuid;

use crate::anticheat::Infraction;
use crate::codec::GameCode;
use crate::config::Config;

#[derive(Debug, Deserialize)]
struct GameIdRow {
    game_id: Option<Uuid>,
}

/// Metrics sink client.
#[derive(Clone)]
pub struct Metrics {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl Metrics {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.metrics_base_url.clone(),
            api_token: config.metrics_api_token.clone(),
        }
    }

    /// Current recorded game id for a room, if the sink has one.
    pub async fn current_game_id(&self, code: GameCode) -> Result<Option<Uuid>, MetricsError> {
        let url = format!("{}/v1/games/current?room={}", self.base_url, code.0);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(MetricsError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::Api { status: status.as_u16(), body });
        }

        let row: GameIdRow = response.json().await.map_err(MetricsError::Parse)?;
        Ok(row.game_id)
    }

    /// Batched infraction insert.
    pub async fn flush_infractions(&self, batch: &[Infraction]) -> Result<(), MetricsError> {
        if batch.is_empty() {
            return Ok(());
        }

        let url = format!("{}/v1/infractions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(batch)
            .send()
            .await
            .map_err(MetricsError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::Api { status: status.as_u16(), body });
        }

        Ok(())
    }
}

/// Metrics sink errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}
