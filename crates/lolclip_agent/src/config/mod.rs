#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use lolclip_domain::{EventKind, TriggerRule};
use lolclip_obs::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};


pub const DEFAULT_REPLAY_DELAY_SECS: f64 = 5.0;

/// Default config path: `~/.lolclip/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".lolclip").join("config.toml"))
}

/// Load the agent config from TOML and env overrides.
///
/// A missing file is replaced by a freshly written default one.
pub fn load_agent_config_from_path(path: &Path) -> anyhow::Result<AgentConfig> {
	let mut cfg = load_file_config(path)?;
	apply_overrides(&mut cfg, |key| std::env::var(key).ok());
	Ok(cfg)
}

/// File-only half of `load_agent_config_from_path`.
pub fn load_file_config(path: &Path) -> anyhow::Result<AgentConfig> {
	let file_cfg = match read_toml_if_exists(path).with_context(|| format!("read config from {}", path.display()))? {
		Some(cfg) => cfg,
		None => {
			write_default_config(path).with_context(|| format!("write default config to {}", path.display()))?;
			info!(path = %path.display(), "no config found; wrote defaults");
			read_toml_if_exists(path)
				.with_context(|| format!("reload default config from {}", path.display()))?
				.ok_or_else(|| anyhow!("default config vanished after write"))?
		}
	};

	Ok(AgentConfig::from_file(file_cfg))
}

/// Agent config (v1).
#[derive(Debug, Clone)]
pub struct AgentConfig {
	/// Seconds between a qualifying event and the save request.
	pub replay_delay: f64,
	/// Per-kind enable flags. Kinds not listed are disabled.
	pub trigger_events: BTreeMap<EventKind, bool>,
	/// Per-kind delay overrides (seconds).
	pub trigger_delays: BTreeMap<EventKind, f64>,
	pub telemetry: TelemetrySettings,
	pub teamfight: TeamFightSettings,
	pub obs: ObsSettings,
	pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
	pub base_url: String,
	pub event_poll_interval: Duration,
	pub state_poll_interval: Duration,
	pub request_timeout: Duration,
	/// Probe the game before each event poll and back off while it is absent.
	pub liveness_probe: bool,
	pub absent_poll_interval: Duration,
	pub identity_ttl: Duration,
}

impl Default for TelemetrySettings {
	fn default() -> Self {
		Self {
			base_url: "https://127.0.0.1:2999".to_string(),
			event_poll_interval: Duration::from_secs(1),
			state_poll_interval: Duration::from_secs(1),
			request_timeout: Duration::from_secs(2),
			liveness_probe: true,
			absent_poll_interval: Duration::from_secs(5),
			identity_ttl: Duration::from_secs(60),
		}
	}
}

#[derive(Debug, Clone)]
pub struct TeamFightSettings {
	/// Health samples kept per entity.
	pub window: usize,
	/// Aggregate health-change ratio that counts as a fight.
	pub health_change_threshold: f64,
	/// Dead champions needed on each side.
	pub min_deaths_per_team: usize,
}

impl Default for TeamFightSettings {
	fn default() -> Self {
		Self {
			window: 10,
			health_change_threshold: 0.3,
			min_deaths_per_team: 2,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ObsSettings {
	pub url: String,
	pub password: Option<SecretString>,
	pub request_timeout: Duration,
}

impl Default for ObsSettings {
	fn default() -> Self {
		Self {
			url: "ws://127.0.0.1:4455".to_string(),
			password: None,
			request_timeout: Duration::from_secs(2),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

impl AgentConfig {
	/// One rule per known kind; delays fall back to `replay_delay`.
	pub fn trigger_rules(&self) -> Vec<TriggerRule> {
		EventKind::ALL
			.into_iter()
			.map(|kind| {
				let enabled = self.trigger_events.get(&kind).copied().unwrap_or(false);
				let delay = self.trigger_delays.get(&kind).copied().unwrap_or(self.replay_delay);
				TriggerRule::new(kind, enabled, delay)
			})
			.collect()
	}

	fn from_file(file: FileConfig) -> Self {
		let telemetry_defaults = TelemetrySettings::default();
		let teamfight_defaults = TeamFightSettings::default();
		let obs_defaults = ObsSettings::default();

		let telemetry = TelemetrySettings {
			base_url: file
				.telemetry
				.base_url
				.filter(|s| !s.trim().is_empty())
				.unwrap_or(telemetry_defaults.base_url),
			event_poll_interval: millis_or(file.telemetry.event_poll_interval_ms, telemetry_defaults.event_poll_interval),
			state_poll_interval: millis_or(file.telemetry.state_poll_interval_ms, telemetry_defaults.state_poll_interval),
			request_timeout: millis_or(file.telemetry.request_timeout_ms, telemetry_defaults.request_timeout),
			liveness_probe: file.telemetry.liveness_probe.unwrap_or(telemetry_defaults.liveness_probe),
			absent_poll_interval: millis_or(
				file.telemetry.absent_poll_interval_ms,
				telemetry_defaults.absent_poll_interval,
			),
			identity_ttl: file
				.telemetry
				.identity_ttl_secs
				.filter(|v| *v > 0)
				.map(Duration::from_secs)
				.unwrap_or(telemetry_defaults.identity_ttl),
		};

		let teamfight = TeamFightSettings {
			window: file.teamfight.window.filter(|v| *v > 0).unwrap_or(teamfight_defaults.window),
			health_change_threshold: file
				.teamfight
				.health_change_threshold
				.filter(|v| v.is_finite() && *v > 0.0)
				.unwrap_or(teamfight_defaults.health_change_threshold),
			min_deaths_per_team: file
				.teamfight
				.min_deaths_per_team
				.filter(|v| *v > 0)
				.unwrap_or(teamfight_defaults.min_deaths_per_team),
		};

		let obs = ObsSettings {
			url: file.obs.url.filter(|s| !s.trim().is_empty()).unwrap_or(obs_defaults.url),
			password: file.obs.password.filter(|s| !s.is_empty()).map(SecretString::new),
			request_timeout: millis_or(file.obs.request_timeout_ms, obs_defaults.request_timeout),
		};

		Self {
			replay_delay: file.replay_delay.map(clamp_delay).unwrap_or(DEFAULT_REPLAY_DELAY_SECS),
			trigger_events: parse_kind_table("trigger_events", file.trigger_events),
			trigger_delays: parse_kind_table("trigger_delays", file.trigger_delays)
				.into_iter()
				.map(|(kind, secs)| (kind, clamp_delay(secs)))
				.collect(),
			telemetry,
			teamfight,
			obs,
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct FileConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	replay_delay: Option<f64>,

	#[serde(default)]
	trigger_events: BTreeMap<String, bool>,

	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	trigger_delays: BTreeMap<String, f64>,

	#[serde(default, skip_serializing)]
	telemetry: FileTelemetrySettings,

	#[serde(default, skip_serializing)]
	teamfight: FileTeamFightSettings,

	#[serde(default, skip_serializing)]
	obs: FileObsSettings,

	#[serde(default, skip_serializing)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTelemetrySettings {
	base_url: Option<String>,
	event_poll_interval_ms: Option<u64>,
	state_poll_interval_ms: Option<u64>,
	request_timeout_ms: Option<u64>,
	liveness_probe: Option<bool>,
	absent_poll_interval_ms: Option<u64>,
	identity_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTeamFightSettings {
	window: Option<usize>,
	health_change_threshold: Option<f64>,
	min_deaths_per_team: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileObsSettings {
	url: Option<String>,
	password: Option<String>,
	request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

fn millis_or(v: Option<u64>, default: Duration) -> Duration {
	v.filter(|ms| *ms > 0).map(Duration::from_millis).unwrap_or(default)
}

fn clamp_delay(secs: f64) -> f64 {
	if secs.is_finite() && secs > 0.0 { secs } else { 0.0 }
}

fn parse_kind_table<V>(table: &str, raw: BTreeMap<String, V>) -> BTreeMap<EventKind, V> {
	let mut out = BTreeMap::new();
	for (name, value) in raw {
		match name.parse::<EventKind>() {
			Ok(kind) => {
				out.insert(kind, value);
			}
			Err(e) => warn!(table, key = %name, error = %e, "config: ignoring unknown event kind"),
		}
	}
	out
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn write_default_config(path: &Path) -> anyhow::Result<()> {
	if let Some(parent) = path.parent()
		&& !parent.as_os_str().is_empty()
	{
		fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
	}

	let defaults = FileConfig {
		replay_delay: Some(DEFAULT_REPLAY_DELAY_SECS),
		..FileConfig::default()
	};
	let body = toml::to_string(&defaults).context("serialize default config")?;
	fs::write(path, body).context("write config file")?;
	Ok(())
}

/// Apply `LOLCLIP_*` overrides; `lookup` is `std::env::var` outside tests.
pub fn apply_overrides(cfg: &mut AgentConfig, lookup: impl Fn(&str) -> Option<String>) {
	let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = non_empty("LOLCLIP_REPLAY_DELAY") {
		match v.parse::<f64>() {
			Ok(secs) => {
				cfg.replay_delay = clamp_delay(secs);
				info!(replay_delay = cfg.replay_delay, "agent config: replay_delay overridden by env");
			}
			Err(e) => warn!(error = %e, value = %v, "agent config: LOLCLIP_REPLAY_DELAY is not a number"),
		}
	}

	if let Some(v) = non_empty("LOLCLIP_TELEMETRY_URL") {
		cfg.telemetry.base_url = v;
		info!("telemetry config: base_url overridden by env");
	}

	if let Some(v) = non_empty("LOLCLIP_OBS_URL") {
		cfg.obs.url = v;
		info!("obs config: url overridden by env");
	}

	if let Some(v) = lookup("LOLCLIP_OBS_PASSWORD").filter(|v| !v.is_empty()) {
		cfg.obs.password = Some(SecretString::new(v));
		info!("obs config: password overridden by env");
	}

	if let Some(v) = non_empty("LOLCLIP_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty("LOLCLIP_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = lookup("LOLCLIP_LIVENESS_PROBE")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.telemetry.liveness_probe = enabled;
		info!(enabled, "telemetry config: liveness_probe overridden by env");
	}
}
