//! HTTP client for the info endpoint.

use crate::clearinghouse::ClearinghouseStateResponse;
use crate::error::{InfoError, InfoResult};
use chrono::Utc;
use reqwest::Client;
use scout_core::{PositionSnapshot, TraderId};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Public Hyperliquid info endpoint.
pub const DEFAULT_INFO_URL: &str = "https://api.hyperliquid.xyz/info";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Info request with a user address.
#[derive(Debug, Serialize)]
struct InfoRequestWithUser<'a> {
    #[serde(rename = "type")]
    request_type: &'static str,
    user: &'a str,
}

/// Client for per-trader state queries.
#[derive(Debug, Clone)]
pub struct InfoClient {
    client: Client,
    info_url: String,
}

impl InfoClient {
    pub fn new(info_url: impl Into<String>) -> InfoResult<Self> {
        Self::with_timeout(info_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(info_url: impl Into<String>, timeout: Duration) -> InfoResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InfoError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            info_url: info_url.into(),
        })
    }

    pub fn info_url(&self) -> &str {
        &self.info_url
    }

    /// Fetch raw `clearinghouseState` for a user.
    pub async fn fetch_clearinghouse_state(
        &self,
        user: &str,
    ) -> InfoResult<ClearinghouseStateResponse> {
        let request = InfoRequestWithUser {
            request_type: "clearinghouseState",
            user,
        };

        let response = self
            .client
            .post(&self.info_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| InfoError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InfoError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| InfoError::HttpClient(format!("Failed to read body: {e}")))?;

        let state: ClearinghouseStateResponse = serde_json::from_slice(&body)
            .map_err(|e| InfoError::Malformed(format!("clearinghouseState: {e}")))?;

        debug!(
            user,
            positions = state.asset_positions.len(),
            "Fetched clearinghouseState"
        );

        Ok(state)
    }

    /// Fetch and validate the current snapshot of `trader`.
    pub async fn fetch_snapshot(&self, trader: &TraderId) -> InfoResult<PositionSnapshot> {
        let state = self.fetch_clearinghouse_state(trader.as_str()).await?;
        state.to_snapshot(trader.clone(), Utc::now())
    }
}
