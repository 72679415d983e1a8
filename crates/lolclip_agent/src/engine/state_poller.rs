#![forbid(unsafe_code)]

//! Team-fight heuristic over the full game-state snapshot.
//!
//! Each cycle records one health sample per champion into a bounded window
//! and derives a signal from the windows: the summed health swing
//! `|oldest - newest| / maxHealth` of every champion, and the number of dead
//! champions per side. Either enough deaths on both sides or a large enough
//! swing counts as a fight. False positives are expected.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use lolclip_domain::{Attributes, EventKind, GameEvent, HealthSample, Team};
use lolclip_telemetry::{GameSnapshot, TelemetrySource};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::dispatcher::Dispatcher;
use crate::engine::health::HealthState;

/// Ids of synthesized events live far away from feed ids.
const TEAMFIGHT_ID_BASE: u64 = 1 << 56;

#[derive(Debug, Clone)]
pub struct TeamFightConfig {
	pub window: usize,
	pub health_change_threshold: f64,
	pub min_deaths_per_team: usize,
}

impl Default for TeamFightConfig {
	fn default() -> Self {
		Self {
			window: 10,
			health_change_threshold: 0.3,
			min_deaths_per_team: 2,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamFightSignal {
	pub health_change_ratio: f64,
	pub order_deaths: usize,
	pub chaos_deaths: usize,
	/// Champions whose health moved inside the window or who are dead.
	pub participants: Vec<String>,
}

impl TeamFightSignal {
	pub fn is_team_fight(&self, cfg: &TeamFightConfig) -> bool {
		let both_sides_lost = self.order_deaths >= cfg.min_deaths_per_team && self.chaos_deaths >= cfg.min_deaths_per_team;
		both_sides_lost || self.health_change_ratio >= cfg.health_change_threshold
	}

	fn into_attributes(self) -> Attributes {
		let mut attributes = Attributes::new();
		attributes.insert(
			"Participants".to_string(),
			Value::Array(self.participants.into_iter().map(Value::String).collect()),
		);
		attributes.insert("HealthChangeRatio".to_string(), Value::from(self.health_change_ratio));
		attributes.insert("OrderDeaths".to_string(), Value::from(self.order_deaths));
		attributes.insert("ChaosDeaths".to_string(), Value::from(self.chaos_deaths));
		attributes
	}
}

/// Rolling per-champion health windows.
#[derive(Debug)]
pub struct HealthWindows {
	window: usize,
	by_entity: HashMap<String, VecDeque<HealthSample>>,
}

impl HealthWindows {
	pub fn new(window: usize) -> Self {
		Self {
			window: window.max(1),
			by_entity: HashMap::new(),
		}
	}

	/// Record `snapshot` and compute this cycle's signal over the champions it lists.
	pub fn observe(&mut self, snapshot: &GameSnapshot, now: Instant) -> TeamFightSignal {
		let mut signal = TeamFightSignal {
			health_change_ratio: 0.0,
			order_deaths: 0,
			chaos_deaths: 0,
			participants: Vec::new(),
		};

		for player in &snapshot.players {
			let (Some(name), Some(team), Some(stats)) = (player.display_name(), player.team(), player.champion_stats)
			else {
				continue;
			};

			let samples = self.by_entity.entry(name.to_string()).or_default();
			samples.push_back(HealthSample {
				entity_name: name.to_string(),
				team,
				health: stats.current_health,
				max_health: stats.max_health,
				captured_at: now,
			});
			while samples.len() > self.window {
				samples.pop_front();
			}

			let (Some(oldest), Some(newest)) = (samples.front(), samples.back()) else {
				continue;
			};

			let swing = (oldest.health - newest.health).abs();
			if newest.max_health > 0.0 {
				signal.health_change_ratio += swing / newest.max_health;
			}

			let dead = newest.health <= 0.0;
			if dead {
				match newest.team {
					Team::Order => signal.order_deaths += 1,
					Team::Chaos => signal.chaos_deaths += 1,
				}
			}

			if dead || swing > 0.0 {
				signal.participants.push(name.to_string());
			}
		}

		signal.participants.sort();
		signal
	}

	pub fn clear(&mut self) {
		self.by_entity.clear();
	}

	#[allow(dead_code)]
	pub fn samples(&self, entity: &str) -> usize {
		self.by_entity.get(entity).map(VecDeque::len).unwrap_or(0)
	}
}

#[derive(Debug, Clone)]
pub struct StatePollerConfig {
	pub interval: Duration,
	pub teamfight: TeamFightConfig,
}

/// Polls the game-state snapshot and synthesizes at most one `TeamFight`
/// event per cycle.
pub struct StatePoller {
	source: Arc<dyn TelemetrySource>,
	dispatcher: Dispatcher,
	cfg: StatePollerConfig,
	windows: HealthWindows,
	next_id: u64,
	presence: Option<HealthState>,
	sessions: Option<watch::Receiver<u64>>,
}

impl StatePoller {
	pub fn new(source: Arc<dyn TelemetrySource>, dispatcher: Dispatcher, cfg: StatePollerConfig) -> Self {
		Self {
			source,
			dispatcher,
			windows: HealthWindows::new(cfg.teamfight.window),
			cfg,
			next_id: TEAMFIGHT_ID_BASE,
			presence: None,
			sessions: None,
		}
	}

	/// Skip cycles while the event poller's liveness probe reports no game.
	pub fn gated_on(mut self, presence: HealthState) -> Self {
		self.presence = Some(presence);
		self
	}

	/// Start from empty windows whenever `sessions` reports a new game.
	pub fn follow_sessions(mut self, sessions: watch::Receiver<u64>) -> Self {
		self.sessions = Some(sessions);
		self
	}

	/// One fetch; returns the synthesized event, if any.
	pub async fn poll_once(&mut self) -> anyhow::Result<Option<Arc<GameEvent>>> {
		if let Some(sessions) = self.sessions.as_mut()
			&& sessions.has_changed().unwrap_or(false)
		{
			let session = *sessions.borrow_and_update();
			self.windows.clear();
			debug!(session, "new game; health windows cleared");
		}

		let snapshot = self.source.game_snapshot().await.context("fetch game snapshot")?;
		let signal = self.windows.observe(&snapshot, Instant::now());

		if !signal.is_team_fight(&self.cfg.teamfight) {
			return Ok(None);
		}

		info!(
			ratio = signal.health_change_ratio,
			order_deaths = signal.order_deaths,
			chaos_deaths = signal.chaos_deaths,
			participants = signal.participants.len(),
			"team fight detected"
		);
		metrics::counter!("lolclip_teamfight_signals_total").increment(1);

		self.next_id += 1;
		let event = Arc::new(GameEvent::new(
			self.next_id,
			EventKind::TeamFight,
			None,
			signal.into_attributes(),
		));
		let spawned = self.dispatcher.dispatch(EventKind::TeamFight, Arc::clone(&event));
		debug!(event_id = self.next_id, handlers = spawned.len(), "team fight dispatched");

		Ok(Some(event))
	}

	/// Poll until `stop` turns true (or its sender is dropped).
	pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
		info!(
			interval_ms = self.cfg.interval.as_millis() as u64,
			window = self.cfg.teamfight.window,
			"state poller started"
		);
		while !*stop.borrow() {
			let game_present = self.presence.as_ref().is_none_or(HealthState::game_present);
			if game_present && let Err(e) = self.poll_once().await {
				warn!(error = %format!("{e:#}"), "game snapshot poll failed; skipping cycle");
				metrics::counter!("lolclip_poll_failures_total", "feed" => "state").increment(1);
			}

			tokio::select! {
				_ = tokio::time::sleep(self.cfg.interval) => {}
				res = stop.changed() => {
					if res.is_err() {
						break;
					}
				}
			}
		}
		info!("state poller stopped");
	}
}
