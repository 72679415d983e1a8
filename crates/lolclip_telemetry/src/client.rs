#![forbid(unsafe_code)]

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{ActivePlayer, EventFeed, GameSnapshot, TelemetryError, TelemetrySource};

/// Live Client Data API settings.
#[derive(Debug, Clone)]
pub struct LiveClientConfig {
	pub base_url: String,
	pub request_timeout: Duration,
}

impl Default for LiveClientConfig {
	fn default() -> Self {
		Self {
			base_url: "https://127.0.0.1:2999".to_string(),
			request_timeout: Duration::from_secs(2),
		}
	}
}

/// HTTP client for the game's local Live Client Data API.
#[derive(Debug, Clone)]
pub struct LiveClient {
	base_url: String,
	client: reqwest::Client,
}

impl LiveClient {
	pub fn new(cfg: LiveClientConfig) -> Result<Self, TelemetryError> {
		// The game serves a self-signed certificate on loopback.
		let client = reqwest::Client::builder()
			.danger_accept_invalid_certs(true)
			.timeout(cfg.request_timeout)
			.build()
			.map_err(TelemetryError::Unavailable)?;

		Ok(Self {
			base_url: cfg.base_url.trim_end_matches('/').to_string(),
			client,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/liveclientdata/{}", self.base_url, path)
	}

	async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TelemetryError> {
		let resp = self
			.client
			.get(self.url(path))
			.header("Accept", "application/json")
			.send()
			.await
			.map_err(TelemetryError::Unavailable)?;

		let status = resp.status();
		if !status.is_success() {
			return Err(TelemetryError::Status(status));
		}

		let body = resp.text().await.map_err(TelemetryError::Unavailable)?;
		serde_json::from_str(&body).map_err(|e| TelemetryError::Malformed(format!("{path}: {e}")))
	}
}

#[async_trait::async_trait]
impl TelemetrySource for LiveClient {
	async fn event_feed(&self) -> Result<EventFeed, TelemetryError> {
		self.get_json("eventdata").await
	}

	async fn game_snapshot(&self) -> Result<GameSnapshot, TelemetryError> {
		self.get_json("allgamedata").await
	}

	async fn active_player(&self) -> Result<ActivePlayer, TelemetryError> {
		self.get_json("activeplayer").await
	}

	async fn is_game_present(&self) -> bool {
		match self.client.get(self.url("gamestats")).send().await {
			Ok(resp) => resp.status() == StatusCode::OK,
			Err(e) => {
				debug!(error = %e, "liveness probe failed");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn unreachable_client() -> LiveClient {
		// Port 9 (discard) on loopback refuses connections on any sane host.
		LiveClient::new(LiveClientConfig {
			base_url: "https://127.0.0.1:9/".to_string(),
			request_timeout: Duration::from_millis(500),
		})
		.expect("build client")
	}

	#[test]
	fn urls_are_built_under_liveclientdata() {
		let client = unreachable_client();
		assert_eq!(client.url("eventdata"), "https://127.0.0.1:9/liveclientdata/eventdata");
	}

	#[tokio::test]
	async fn unreachable_game_is_unavailable_not_a_panic() {
		let client = unreachable_client();

		let err = client.event_feed().await.expect_err("nothing listens on port 9");
		assert!(matches!(err, TelemetryError::Unavailable(_)), "got {err:?}");
		assert!(!client.is_game_present().await);
	}
}
