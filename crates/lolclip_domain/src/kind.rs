#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Attributes, ParseKindError};

/// Closed set of event kinds the agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
	ChampionKill,
	Multikill,
	Ace,
	DragonKill,
	BaronKill,
	HeraldKill,
	TurretKilled,
	InhibKilled,
	FirstBrick,
	GameStart,
	GameEnd,
	MinionsSpawning,
	ChampionDeath,
	DragonSteal,
	HeraldSteal,
	BaronSteal,

	/// Synthesized from the game-state snapshot, never read from the event feed.
	TeamFight,
}

impl EventKind {
	pub const ALL: [EventKind; 17] = [
		EventKind::ChampionKill,
		EventKind::Multikill,
		EventKind::Ace,
		EventKind::DragonKill,
		EventKind::BaronKill,
		EventKind::HeraldKill,
		EventKind::TurretKilled,
		EventKind::InhibKilled,
		EventKind::FirstBrick,
		EventKind::GameStart,
		EventKind::GameEnd,
		EventKind::MinionsSpawning,
		EventKind::ChampionDeath,
		EventKind::DragonSteal,
		EventKind::HeraldSteal,
		EventKind::BaronSteal,
		EventKind::TeamFight,
	];

	/// Stable name, used in config keys and logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::ChampionKill => "ChampionKill",
			EventKind::Multikill => "Multikill",
			EventKind::Ace => "Ace",
			EventKind::DragonKill => "DragonKill",
			EventKind::BaronKill => "BaronKill",
			EventKind::HeraldKill => "HeraldKill",
			EventKind::TurretKilled => "TurretKilled",
			EventKind::InhibKilled => "InhibKilled",
			EventKind::FirstBrick => "FirstBrick",
			EventKind::GameStart => "GameStart",
			EventKind::GameEnd => "GameEnd",
			EventKind::MinionsSpawning => "MinionsSpawning",
			EventKind::ChampionDeath => "ChampionDeath",
			EventKind::DragonSteal => "DragonSteal",
			EventKind::HeraldSteal => "HeraldSteal",
			EventKind::BaronSteal => "BaronSteal",
			EventKind::TeamFight => "TeamFight",
		}
	}

	pub const fn is_synthetic(self) -> bool {
		matches!(self, EventKind::TeamFight)
	}

	/// Attribute names naming who caused an event of this kind.
	pub const fn actor_attributes(self) -> &'static [&'static str] {
		match self {
			EventKind::ChampionKill
			| EventKind::Multikill
			| EventKind::DragonKill
			| EventKind::BaronKill
			| EventKind::HeraldKill
			| EventKind::DragonSteal
			| EventKind::HeraldSteal
			| EventKind::BaronSteal
			| EventKind::TurretKilled
			| EventKind::InhibKilled
			| EventKind::FirstBrick => &["KillerName"],
			EventKind::Ace => &["Acer"],
			EventKind::ChampionDeath => &["VictimName"],
			EventKind::TeamFight => &["Participants"],
			EventKind::GameStart | EventKind::GameEnd | EventKind::MinionsSpawning => &[],
		}
	}

	fn stolen_variant(self) -> Option<EventKind> {
		match self {
			EventKind::DragonKill => Some(EventKind::DragonSteal),
			EventKind::HeraldKill => Some(EventKind::HeraldSteal),
			EventKind::BaronKill => Some(EventKind::BaronSteal),
			_ => None,
		}
	}

	/// Classify a telemetry `EventName`.
	///
	/// Objective kills flagged `Stolen: "True"` become their steal variant. The
	/// synthetic `TeamFight` name is never accepted from the feed.
	pub fn classify(name: &str, attributes: &Attributes) -> SourceKind {
		let kind = match name.parse::<EventKind>() {
			Ok(kind) if !kind.is_synthetic() => kind,
			_ => return SourceKind::Unrecognized(name.to_string()),
		};

		let stolen = attributes
			.get("Stolen")
			.map(|v| match v {
				serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
				serde_json::Value::Bool(b) => *b,
				_ => false,
			})
			.unwrap_or(false);

		match kind.stolen_variant() {
			Some(steal) if stolen => SourceKind::Known(steal),
			_ => SourceKind::Known(kind),
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = ParseKindError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseKindError::Empty);
		}

		if let Some(kind) = EventKind::ALL.into_iter().find(|k| k.as_str() == s) {
			return Ok(kind);
		}

		match s {
			"InhibitorKilled" => Ok(EventKind::InhibKilled),
			"FirstStructureKill" => Ok(EventKind::FirstBrick),
			"PlayerDeath" => Ok(EventKind::ChampionDeath),
			other => Err(ParseKindError::UnknownKind(other.to_string())),
		}
	}
}

/// Result of classifying a source event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
	Known(EventKind),

	/// Logged and counted, never dispatched.
	Unrecognized(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
		pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
	}

	#[test]
	fn canonical_names_parse_back() {
		for kind in EventKind::ALL {
			assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
		}
	}

	#[test]
	fn aliases_parse() {
		assert_eq!("InhibitorKilled".parse::<EventKind>().unwrap(), EventKind::InhibKilled);
		assert_eq!("FirstStructureKill".parse::<EventKind>().unwrap(), EventKind::FirstBrick);
		assert_eq!("PlayerDeath".parse::<EventKind>().unwrap(), EventKind::ChampionDeath);
	}

	#[test]
	fn unknown_and_empty_names_fail() {
		assert_eq!("".parse::<EventKind>(), Err(ParseKindError::Empty));
		assert!(matches!(
			"FirstBlood".parse::<EventKind>(),
			Err(ParseKindError::UnknownKind(name)) if name == "FirstBlood"
		));
	}

	#[test]
	fn classify_marks_unknown_names_unrecognized() {
		let out = EventKind::classify("FirstBlood", &Attributes::new());
		assert_eq!(out, SourceKind::Unrecognized("FirstBlood".to_string()));
	}

	#[test]
	fn classify_rejects_synthetic_team_fight_from_feed() {
		let out = EventKind::classify("TeamFight", &Attributes::new());
		assert_eq!(out, SourceKind::Unrecognized("TeamFight".to_string()));
	}

	#[test]
	fn classify_promotes_stolen_objectives() {
		let stolen = attrs(&[("Stolen", serde_json::json!("True"))]);
		assert_eq!(
			EventKind::classify("BaronKill", &stolen),
			SourceKind::Known(EventKind::BaronSteal)
		);

		let not_stolen = attrs(&[("Stolen", serde_json::json!("False"))]);
		assert_eq!(
			EventKind::classify("DragonKill", &not_stolen),
			SourceKind::Known(EventKind::DragonKill)
		);

		assert_eq!(
			EventKind::classify("TurretKilled", &stolen),
			SourceKind::Known(EventKind::TurretKilled)
		);
	}
}
