#![forbid(unsafe_code)]

use std::time::{Instant, SystemTime};

use crate::{Attributes, EventKind};

/// A single noteworthy in-game moment. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct GameEvent {
	id: u64,
	kind: EventKind,
	occurred_at: SystemTime,
	observed_at: Instant,
	game_time: Option<f64>,
	attributes: Attributes,
}

impl GameEvent {
	/// Construct an event observed now.
	pub fn new(id: u64, kind: EventKind, game_time: Option<f64>, attributes: Attributes) -> Self {
		Self {
			id,
			kind,
			occurred_at: SystemTime::now(),
			observed_at: Instant::now(),
			game_time,
			attributes,
		}
	}

	/// Source-assigned id (`EventID`), or a poller-local sequence for synthetic events.
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn kind(&self) -> EventKind {
		self.kind
	}

	/// Wall-clock receipt time.
	pub fn occurred_at(&self) -> SystemTime {
		self.occurred_at
	}

	/// Monotonic receipt time; trigger delays are measured from here.
	pub fn observed_at(&self) -> Instant {
		self.observed_at
	}

	/// Same event, observed at `at` on a caller-chosen clock.
	pub fn with_observed_at(mut self, at: Instant) -> Self {
		self.observed_at = at;
		self
	}

	/// In-game clock (`EventTime`, seconds since game start) when provided.
	pub fn game_time(&self) -> Option<f64> {
		self.game_time
	}

	pub fn attributes(&self) -> &Attributes {
		&self.attributes
	}

	/// Names of the players credited with causing this event.
	pub fn actors(&self) -> Vec<&str> {
		let mut out = Vec::new();
		for key in self.kind.actor_attributes() {
			match self.attributes.get(*key) {
				Some(serde_json::Value::String(name)) if !name.trim().is_empty() => out.push(name.as_str()),
				Some(serde_json::Value::Array(names)) => {
					out.extend(names.iter().filter_map(|v| v.as_str()).filter(|s| !s.trim().is_empty()));
				}
				_ => {}
			}
		}
		out
	}

	/// True when `name` is one of this event's actors.
	pub fn is_caused_by(&self, name: &str) -> bool {
		self.actors().into_iter().any(|actor| actor == name)
	}
}
