#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use lolclip_domain::{DedupKey, EventKind, GameEvent, SourceKind};
use lolclip_telemetry::{RawEvent, TelemetrySource};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::dispatcher::Dispatcher;
use crate::engine::health::HealthState;

/// Ids handed to feed entries that carry no `EventID`.
const LOCAL_ID_BASE: u64 = 1 << 48;

#[derive(Debug, Clone)]
pub struct EventPollerConfig {
	pub interval: Duration,
	pub liveness_probe: bool,
	pub absent_interval: Duration,
}

impl Default for EventPollerConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(1),
			liveness_probe: true,
			absent_interval: Duration::from_secs(5),
		}
	}
}

/// Highest `EventID` and `EventTime` a feed has listed.
///
/// The feed is cumulative for the whole match, so neither value goes down
/// until the next match starts over.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FeedMark {
	max_id: Option<u64>,
	max_time: Option<f64>,
}

impl FeedMark {
	fn of(entries: &[RawEvent]) -> Self {
		Self {
			max_id: entries.iter().filter_map(|e| e.id).max(),
			max_time: entries.iter().filter_map(|e| e.time).max_by(f64::total_cmp),
		}
	}

	fn is_behind(&self, previous: &FeedMark) -> bool {
		let id_back = matches!((previous.max_id, self.max_id), (Some(p), Some(n)) if n < p);
		let time_back = matches!((previous.max_time, self.max_time), (Some(p), Some(n)) if n < p);
		id_back || time_back
	}

	fn advance(&mut self, other: FeedMark) {
		self.max_id = self.max_id.max(other.max_id);
		self.max_time = match (self.max_time, other.max_time) {
			(Some(a), Some(b)) => Some(a.max(b)),
			(a, b) => a.or(b),
		};
	}
}

/// Dedup state of the event feed.
///
/// Keys are scoped by a session that only advances when the feed itself
/// rewinds (a new match restarts `EventID` and `EventTime`). Liveness probe
/// results never touch it.
#[derive(Debug, Default)]
pub struct SeenEvents {
	session: u64,
	seen: HashSet<DedupKey>,
	mark: FeedMark,
}

impl SeenEvents {
	pub fn session(&self) -> u64 {
		self.session
	}

	fn new_session(&mut self) {
		self.session += 1;
		self.seen.clear();
		self.mark = FeedMark::default();
	}

	/// Entries not seen before, marked seen, in ascending `(EventID, EventTime)`.
	///
	/// A feed that lists lower ids or times than any earlier one belongs to a
	/// new match and starts a new session first. An empty feed carries no
	/// information and never does.
	pub fn admit(&mut self, entries: Vec<RawEvent>) -> Vec<RawEvent> {
		let mark = FeedMark::of(&entries);
		if mark.is_behind(&self.mark) {
			self.new_session();
		}
		self.mark.advance(mark);

		let session = self.session;
		let mut fresh: Vec<RawEvent> = entries
			.into_iter()
			.filter(|e| self.seen.insert(DedupKey::for_entry(session, e.id, &e.name, e.time)))
			.collect();

		fresh.sort_by(|a, b| {
			a.id.cmp(&b.id)
				.then_with(|| a.time.unwrap_or_default().total_cmp(&b.time.unwrap_or_default()))
		});
		fresh
	}
}

/// Polls the telemetry event feed and hands every new, known event to the
/// dispatcher exactly once.
pub struct EventPoller {
	source: Arc<dyn TelemetrySource>,
	dispatcher: Dispatcher,
	cfg: EventPollerConfig,
	health: HealthState,
	seen: SeenEvents,
	sessions: watch::Sender<u64>,
	present: Option<bool>,
	next_local_id: u64,
}

impl EventPoller {
	pub fn new(
		source: Arc<dyn TelemetrySource>,
		dispatcher: Dispatcher,
		cfg: EventPollerConfig,
		health: HealthState,
	) -> Self {
		Self {
			source,
			dispatcher,
			cfg,
			health,
			seen: SeenEvents::default(),
			sessions: watch::Sender::new(0),
			present: None,
			next_local_id: LOCAL_ID_BASE,
		}
	}

	pub fn session(&self) -> u64 {
		self.seen.session()
	}

	/// Session changes, one per new match seen in the feed.
	pub fn subscribe_sessions(&self) -> watch::Receiver<u64> {
		self.sessions.subscribe()
	}

	/// One fetch; returns the events handed to the dispatcher.
	pub async fn poll_once(&mut self) -> anyhow::Result<Vec<Arc<GameEvent>>> {
		let feed = self.source.event_feed().await.context("fetch event feed")?;
		if !self.cfg.liveness_probe {
			self.health.set_game_present(true);
		}

		let session = self.seen.session();
		let fresh = self.seen.admit(feed.events);
		if self.seen.session() != session {
			info!(session = self.seen.session(), "event feed restarted; new game");
			self.sessions.send_replace(self.seen.session());
		}

		let mut delivered = Vec::new();
		for raw in fresh {
			match EventKind::classify(&raw.name, &raw.attributes) {
				SourceKind::Unrecognized(name) => {
					debug!(event_name = %name, event_id = ?raw.id, "ignoring unrecognized event");
					metrics::counter!("lolclip_unrecognized_events_total").increment(1);
				}
				SourceKind::Known(kind) => {
					let id = raw.id.unwrap_or_else(|| {
						self.next_local_id += 1;
						self.next_local_id
					});
					let event = Arc::new(GameEvent::new(id, kind, raw.time, raw.attributes));
					let spawned = self.dispatcher.dispatch(kind, Arc::clone(&event));
					if spawned.is_empty() {
						debug!(kind = %kind, event_id = id, "no handler subscribed");
					} else {
						debug!(
							kind = %kind,
							event_id = id,
							game_time = ?event.game_time(),
							handlers = spawned.len(),
							"event dispatched"
						);
					}
					delivered.push(event);
				}
			}
		}

		Ok(delivered)
	}

	/// Record a liveness probe result. Returns true when the game is present.
	pub fn observe_presence(&mut self, present: bool) -> bool {
		match (self.present, present) {
			(None | Some(false), true) => info!(session = self.seen.session(), "game detected"),
			(None | Some(true), false) => info!("game not running; waiting"),
			(Some(true), true) | (Some(false), false) => {}
		}

		self.present = Some(present);
		self.health.set_game_present(present);
		present
	}

	/// One cadence tick; returns how long to sleep before the next one.
	async fn tick(&mut self) -> Duration {
		if self.cfg.liveness_probe {
			let present = self.source.is_game_present().await;
			if !self.observe_presence(present) {
				return self.cfg.absent_interval;
			}
		}

		if let Err(e) = self.poll_once().await {
			warn!(error = %format!("{e:#}"), "event feed poll failed; skipping cycle");
			metrics::counter!("lolclip_poll_failures_total", "feed" => "events").increment(1);
			if !self.cfg.liveness_probe {
				self.health.set_game_present(false);
			}
		}

		self.cfg.interval
	}

	/// Poll until `stop` turns true (or its sender is dropped).
	pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
		info!(interval_ms = self.cfg.interval.as_millis() as u64, "event poller started");
		while !*stop.borrow() {
			let wait = self.tick().await;
			tokio::select! {
				_ = tokio::time::sleep(wait) => {}
				res = stop.changed() => {
					if res.is_err() {
						break;
					}
				}
			}
		}
		info!("event poller stopped");
	}
}
