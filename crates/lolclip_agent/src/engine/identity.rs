#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use lolclip_telemetry::{TelemetryError, TelemetrySource};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct TrackedIdentity {
	name: Option<String>,
	resolved_at: Option<Instant>,
}

/// Cached name of the locally controlled player.
pub struct IdentityResolver {
	source: Arc<dyn TelemetrySource>,
	ttl: Duration,
	cached: Mutex<TrackedIdentity>,
}

impl IdentityResolver {
	pub fn new(source: Arc<dyn TelemetrySource>, ttl: Duration) -> Self {
		Self {
			source,
			ttl,
			cached: Mutex::new(TrackedIdentity::default()),
		}
	}

	/// Fresh cache hit, else one lookup. A failed lookup keeps serving the last
	/// good name (even past its TTL); `None` only while nothing was ever resolved.
	pub async fn resolve(&self) -> Option<String> {
		let mut cached = self.cached.lock().await;

		if let (Some(name), Some(at)) = (&cached.name, cached.resolved_at)
			&& at.elapsed() < self.ttl
		{
			return Some(name.clone());
		}

		match self.lookup().await {
			Ok(name) => {
				if cached.name.as_deref() != Some(name.as_str()) {
					debug!(identity = %name, "tracked identity resolved");
				}
				cached.name = Some(name.clone());
				cached.resolved_at = Some(Instant::now());
				Some(name)
			}
			Err(e) => {
				warn!(error = %e, cached = ?cached.name, "active player lookup failed");
				cached.name.clone()
			}
		}
	}

	async fn lookup(&self) -> Result<String, TelemetryError> {
		let player = self.source.active_player().await?;
		player
			.display_name()
			.map(str::to_string)
			.ok_or(TelemetryError::Missing("activeplayer.summonerName"))
	}
}
