#![forbid(unsafe_code)]

mod client;
mod payload;

pub use client::{LiveClient, LiveClientConfig};
pub use payload::{ActivePlayer, ChampionStats, EventFeed, GameSnapshot, PlayerSnapshot, RawEvent};

/// Errors reading the game's local telemetry API.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
	/// Connection refused, timeout, TLS failure.
	#[error("telemetry unavailable: {0}")]
	Unavailable(#[source] reqwest::Error),

	/// Non-success HTTP status.
	#[error("telemetry returned status {0}")]
	Status(reqwest::StatusCode),

	/// Body was not the expected JSON.
	#[error("malformed telemetry payload: {0}")]
	Malformed(String),

	/// Payload parsed but a required value was absent.
	#[error("telemetry payload missing {0}")]
	Missing(&'static str),
}

/// Read side of the game's telemetry API.
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync + 'static {
	/// Full event list of the current game.
	async fn event_feed(&self) -> Result<EventFeed, TelemetryError>;

	/// Full game-state snapshot.
	async fn game_snapshot(&self) -> Result<GameSnapshot, TelemetryError>;

	/// Locally controlled player.
	async fn active_player(&self) -> Result<ActivePlayer, TelemetryError>;

	/// Cheap liveness probe; true when the game answers with HTTP 200.
	async fn is_game_present(&self) -> bool;
}
