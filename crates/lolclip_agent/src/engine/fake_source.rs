#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lolclip_telemetry::{ActivePlayer, EventFeed, GameSnapshot, TelemetryError, TelemetrySource};
use parking_lot::Mutex;

/// Scripted telemetry. Each queue yields its responses in order; an empty
/// queue answers `Malformed`, as if the game stopped responding.
#[derive(Default)]
pub struct FakeTelemetry {
	feeds: Mutex<VecDeque<Result<EventFeed, String>>>,
	snapshots: Mutex<VecDeque<Result<GameSnapshot, String>>>,
	players: Mutex<VecDeque<Result<ActivePlayer, String>>>,
	present: AtomicBool,
	pub active_player_calls: AtomicUsize,
}

impl FakeTelemetry {
	pub fn new() -> Arc<Self> {
		let fake = Self::default();
		fake.present.store(true, Ordering::SeqCst);
		Arc::new(fake)
	}

	pub fn push_feed_json(&self, raw: &str) {
		let feed = serde_json::from_str(raw).map_err(|e| e.to_string());
		self.feeds.lock().push_back(feed);
	}

	pub fn push_feed_error(&self) {
		self.feeds.lock().push_back(Err("connection refused".to_string()));
	}

	pub fn push_snapshot_json(&self, raw: &str) {
		let snapshot = serde_json::from_str(raw).map_err(|e| e.to_string());
		self.snapshots.lock().push_back(snapshot);
	}

	pub fn push_snapshot_error(&self) {
		self.snapshots.lock().push_back(Err("connection refused".to_string()));
	}

	pub fn push_player(&self, name: &str) {
		self.players.lock().push_back(Ok(ActivePlayer {
			summoner_name: name.to_string(),
			riot_id_game_name: None,
		}));
	}

	pub fn push_player_error(&self) {
		self.players.lock().push_back(Err("timeout".to_string()));
	}

	pub fn set_present(&self, present: bool) {
		self.present.store(present, Ordering::SeqCst);
	}
}

fn next<T>(queue: &Mutex<VecDeque<Result<T, String>>>) -> Result<T, TelemetryError> {
	match queue.lock().pop_front() {
		Some(Ok(v)) => Ok(v),
		Some(Err(e)) => Err(TelemetryError::Malformed(e)),
		None => Err(TelemetryError::Malformed("script exhausted".to_string())),
	}
}

#[async_trait::async_trait]
impl TelemetrySource for FakeTelemetry {
	async fn event_feed(&self) -> Result<EventFeed, TelemetryError> {
		next(&self.feeds)
	}

	async fn game_snapshot(&self) -> Result<GameSnapshot, TelemetryError> {
		next(&self.snapshots)
	}

	async fn active_player(&self) -> Result<ActivePlayer, TelemetryError> {
		self.active_player_calls.fetch_add(1, Ordering::SeqCst);
		next(&self.players)
	}

	async fn is_game_present(&self) -> bool {
		self.present.load(Ordering::SeqCst)
	}
}
