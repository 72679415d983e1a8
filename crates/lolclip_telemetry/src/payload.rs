#![forbid(unsafe_code)]

use lolclip_domain::{Attributes, Team};
use serde::Deserialize;

/// `GET /liveclientdata/eventdata`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFeed {
	#[serde(rename = "Events", default)]
	pub events: Vec<RawEvent>,
}

/// One entry of the event feed, before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
	#[serde(rename = "EventID", default)]
	pub id: Option<u64>,

	#[serde(rename = "EventName")]
	pub name: String,

	/// Seconds since game start.
	#[serde(rename = "EventTime", default)]
	pub time: Option<f64>,

	/// Everything else (`KillerName`, `VictimName`, `Assisters`, ...).
	#[serde(flatten)]
	pub attributes: Attributes,
}

/// `GET /liveclientdata/allgamedata` (only the parts the heuristics read).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameSnapshot {
	#[serde(rename = "allPlayers", default)]
	pub players: Vec<PlayerSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerSnapshot {
	#[serde(rename = "summonerName", default)]
	pub summoner_name: String,

	#[serde(rename = "riotIdGameName", default)]
	pub riot_id_game_name: Option<String>,

	#[serde(default)]
	pub team: String,

	#[serde(rename = "championStats", default)]
	pub champion_stats: Option<ChampionStats>,
}

impl PlayerSnapshot {
	pub fn display_name(&self) -> Option<&str> {
		pick_name(&self.summoner_name, self.riot_id_game_name.as_deref())
	}

	/// `None` for spectator/neutral sides.
	pub fn team(&self) -> Option<Team> {
		self.team.parse().ok()
	}
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChampionStats {
	#[serde(rename = "currentHealth", default)]
	pub current_health: f64,

	#[serde(rename = "maxHealth", default)]
	pub max_health: f64,
}

/// `GET /liveclientdata/activeplayer`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivePlayer {
	#[serde(rename = "summonerName", default)]
	pub summoner_name: String,

	#[serde(rename = "riotIdGameName", default)]
	pub riot_id_game_name: Option<String>,
}

impl ActivePlayer {
	pub fn display_name(&self) -> Option<&str> {
		pick_name(&self.summoner_name, self.riot_id_game_name.as_deref())
	}
}

fn pick_name<'a>(summoner_name: &'a str, riot_id_game_name: Option<&'a str>) -> Option<&'a str> {
	let summoner_name = summoner_name.trim();
	if !summoner_name.is_empty() {
		return Some(summoner_name);
	}
	riot_id_game_name.map(str::trim).filter(|s| !s.is_empty())
}
