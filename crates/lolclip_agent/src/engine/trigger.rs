#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use lolclip_domain::{EventKind, GameEvent, TriggerRule};
use lolclip_obs::{ConnectionState, ObsClient};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::dispatcher::{Dispatcher, EventHandler};
use crate::engine::health::HealthState;
use crate::engine::identity::IdentityResolver;

/// The external "save replay" side effect.
#[async_trait::async_trait]
pub trait ReplayControl: Send + Sync + 'static {
	async fn save_replay(&self) -> anyhow::Result<()>;
}

/// `ReplayControl` over the OBS control channel; mirrors the connection
/// state into the health flags.
pub struct ObsReplay {
	client: Arc<ObsClient>,
	health: HealthState,
}

impl ObsReplay {
	pub fn new(client: Arc<ObsClient>, health: HealthState) -> Self {
		Self { client, health }
	}
}

#[async_trait::async_trait]
impl ReplayControl for ObsReplay {
	async fn save_replay(&self) -> anyhow::Result<()> {
		let res = self.client.save_replay_buffer().await;
		self.health
			.set_obs_identified(self.client.state() == ConnectionState::Identified);
		res.context("save replay buffer")
	}
}

/// Why a dispatched event did not lead to a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	Disabled,
	NoActor,
	IdentityUnknown,
	OtherPlayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
	Saved,
	Skipped(SkipReason),
}

/// Policy layer between dispatched events and the replay side effect.
///
/// Owns only the immutable rule set. Never retries a failed save.
pub struct ReplayTriggerController {
	rules: HashMap<EventKind, TriggerRule>,
	identity: Arc<IdentityResolver>,
	control: Arc<dyn ReplayControl>,
}

impl ReplayTriggerController {
	pub fn new(
		rules: impl IntoIterator<Item = TriggerRule>,
		identity: Arc<IdentityResolver>,
		control: Arc<dyn ReplayControl>,
	) -> Self {
		Self {
			rules: rules.into_iter().map(|r| (r.kind, r)).collect(),
			identity,
			control,
		}
	}

	pub fn enabled_kinds(&self) -> Vec<EventKind> {
		let mut kinds: Vec<EventKind> = self.rules.values().filter(|r| r.enabled).map(|r| r.kind).collect();
		kinds.sort();
		kinds
	}

	/// Subscribe one handler per enabled kind. Returns how many were registered.
	pub fn register(self: &Arc<Self>, dispatcher: &Dispatcher) -> usize {
		let kinds = self.enabled_kinds();
		for kind in &kinds {
			dispatcher.register(*kind, Arc::new(TriggerHandler(Arc::clone(self))));
		}
		info!(kinds = ?kinds, "replay triggers registered");
		kinds.len()
	}

	/// Gate on rule and identity, wait out the delay, then save once.
	pub async fn trigger(&self, event: &GameEvent) -> anyhow::Result<TriggerOutcome> {
		let kind = event.kind();
		let Some(rule) = self.rules.get(&kind).filter(|r| r.enabled) else {
			return Ok(TriggerOutcome::Skipped(SkipReason::Disabled));
		};

		if event.actors().is_empty() {
			debug!(kind = %kind, event_id = event.id(), "event has no actor; not a replay candidate");
			return Ok(TriggerOutcome::Skipped(SkipReason::NoActor));
		}

		let Some(identity) = self.identity.resolve().await else {
			debug!(kind = %kind, event_id = event.id(), "tracked identity unknown; skipping");
			return Ok(TriggerOutcome::Skipped(SkipReason::IdentityUnknown));
		};

		if !event.is_caused_by(&identity) {
			debug!(kind = %kind, event_id = event.id(), actors = ?event.actors(), "event caused by another player");
			return Ok(TriggerOutcome::Skipped(SkipReason::OtherPlayer));
		}

		let deadline = Instant::from_std(event.observed_at()) + rule.delay();
		debug!(
			kind = %kind,
			event_id = event.id(),
			game_time = ?event.game_time(),
			delay_ms = rule.delay().as_millis() as u64,
			"replay save scheduled"
		);
		tokio::time::sleep_until(deadline).await;

		match self.control.save_replay().await {
			Ok(()) => {
				metrics::counter!("lolclip_replay_saves_total").increment(1);
				let since_event_ms = event.occurred_at().elapsed().map(|d| d.as_millis() as u64).unwrap_or(0);
				info!(kind = %kind, event_id = event.id(), identity = %identity, since_event_ms, "replay saved");
				Ok(TriggerOutcome::Saved)
			}
			Err(e) => {
				metrics::counter!("lolclip_replay_save_failures_total").increment(1);
				Err(e.context(format!("replay for {kind} event {}", event.id())))
			}
		}
	}
}

struct TriggerHandler(Arc<ReplayTriggerController>);

#[async_trait::async_trait]
impl EventHandler for TriggerHandler {
	async fn handle(&self, event: Arc<GameEvent>) -> anyhow::Result<()> {
		self.0.trigger(&event).await.map(|_| ())
	}
}
