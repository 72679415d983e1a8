#![forbid(unsafe_code)]

mod event;
mod kind;

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use event::GameEvent;
pub use kind::{EventKind, SourceKind};

/// Free-form event attributes as delivered by the telemetry feed.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Errors for parsing domain values from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseKindError {
	#[error("empty value")]
	Empty,
	#[error("unknown event kind: {0}")]
	UnknownKind(String),
	#[error("unknown team: {0}")]
	UnknownTeam(String),
}

/// Map side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
	#[serde(rename = "ORDER")]
	Order,
	#[serde(rename = "CHAOS")]
	Chaos,
}

impl Team {
	pub const fn as_str(self) -> &'static str {
		match self {
			Team::Order => "ORDER",
			Team::Chaos => "CHAOS",
		}
	}
}

impl fmt::Display for Team {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Team {
	type Err = ParseKindError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"" => Err(ParseKindError::Empty),
			"ORDER" => Ok(Team::Order),
			"CHAOS" => Ok(Team::Chaos),
			other => Err(ParseKindError::UnknownTeam(other.to_string())),
		}
	}
}

/// One health reading of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
	pub entity_name: String,
	pub team: Team,
	pub health: f64,
	pub max_health: f64,
	pub captured_at: Instant,
}

/// Identifies an already-seen feed entry.
///
/// `session` separates games: the feed restarts its ids at zero for every match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
	Id { session: u64, id: u64 },
	Timed { session: u64, name: String, time_bits: u64 },
}

impl DedupKey {
	/// Key from `EventID` when present, otherwise from `(EventName, EventTime)`.
	pub fn for_entry(session: u64, id: Option<u64>, name: &str, time: Option<f64>) -> Self {
		match id {
			Some(id) => DedupKey::Id { session, id },
			None => DedupKey::Timed {
				session,
				name: name.to_string(),
				time_bits: time.unwrap_or_default().to_bits(),
			},
		}
	}
}

/// Per-kind trigger configuration, immutable for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerRule {
	pub kind: EventKind,
	pub enabled: bool,
	delay: Duration,
}

impl TriggerRule {
	/// Negative or non-finite delays clamp to zero.
	pub fn new(kind: EventKind, enabled: bool, delay_seconds: f64) -> Self {
		let delay = if delay_seconds.is_finite() && delay_seconds > 0.0 {
			Duration::try_from_secs_f64(delay_seconds).unwrap_or(Duration::MAX)
		} else {
			Duration::ZERO
		};
		Self { kind, enabled, delay }
	}

	pub fn delay(&self) -> Duration {
		self.delay
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn team_parses_wire_names() {
		assert_eq!("ORDER".parse::<Team>().unwrap(), Team::Order);
		assert_eq!("chaos".parse::<Team>().unwrap(), Team::Chaos);
		assert!(matches!("NEUTRAL".parse::<Team>(), Err(ParseKindError::UnknownTeam(_))));
	}

	#[test]
	fn dedup_key_prefers_event_id() {
		let a = DedupKey::for_entry(0, Some(7), "ChampionKill", Some(1.0));
		let b = DedupKey::for_entry(0, Some(7), "ChampionKill", Some(2.0));
		assert_eq!(a, b);

		let c = DedupKey::for_entry(1, Some(7), "ChampionKill", Some(1.0));
		assert_ne!(a, c, "a new session must not collide with the previous game");
	}

	#[test]
	fn dedup_key_falls_back_to_name_and_time() {
		let a = DedupKey::for_entry(0, None, "ChampionKill", Some(61.25));
		let b = DedupKey::for_entry(0, None, "ChampionKill", Some(61.25));
		let c = DedupKey::for_entry(0, None, "ChampionKill", Some(62.0));
		assert_eq!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn trigger_rule_clamps_delay() {
		assert_eq!(TriggerRule::new(EventKind::Ace, true, -3.0).delay(), Duration::ZERO);
		assert_eq!(TriggerRule::new(EventKind::Ace, true, f64::NAN).delay(), Duration::ZERO);
		assert_eq!(
			TriggerRule::new(EventKind::Ace, true, 2.5).delay(),
			Duration::from_millis(2500)
		);
	}
}
