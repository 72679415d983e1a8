#![forbid(unsafe_code)]

mod config;
mod engine;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use lolclip_obs::{ObsClient, ObsConfig};
use lolclip_telemetry::{LiveClient, LiveClientConfig, TelemetrySource};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::AgentConfig;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::event_poller::{EventPoller, EventPollerConfig};
use crate::engine::health::{HealthState, spawn_health_server};
use crate::engine::identity::IdentityResolver;
use crate::engine::state_poller::{StatePoller, StatePollerConfig, TeamFightConfig};
use crate::engine::trigger::{ObsReplay, ReplayTriggerController};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: lolclip_agent [--config <path>]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.lolclip/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,lolclip_agent=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("lolclip_agent");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

/// Optional `host:port` from config; a bad value disables that listener.
fn listen_addr(what: &'static str, bind: Option<&str>) -> Option<SocketAddr> {
	let bind = bind.map(str::trim).filter(|b| !b.is_empty())?;
	match bind.parse::<SocketAddr>() {
		Ok(addr) => Some(addr),
		Err(e) => {
			warn!(error = %e, %bind, listener = what, "invalid bind address (expected host:port); listener disabled");
			None
		}
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(addr) = listen_addr("metrics", bind) else {
		return;
	};

	match metrics_exporter_prometheus::PrometheusBuilder::new()
		.with_http_listener(addr)
		.install()
	{
		Ok(()) => info!(%addr, "metrics exporter listening"),
		Err(e) => warn!(error = %e, "failed to start metrics exporter"),
	}
}

fn init_health(bind: Option<&str>, state: &HealthState) {
	if let Some(addr) = listen_addr("health", bind) {
		spawn_health_server(addr, state.clone());
		info!(%addr, "health server listening");
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let cfg = crate::config::load_agent_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded agent config (toml + env overrides)");

	init_metrics(cfg.server.metrics_bind.as_deref());

	let health = HealthState::new();
	init_health(cfg.server.health_bind.as_deref(), &health);

	let (stop_tx, stop_rx) = watch::channel(false);
	let tasks = start_agent(&cfg, &health, stop_rx)?;
	health.mark_ready();

	tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
	info!("shutdown requested");
	let _ = stop_tx.send(true);

	for task in tasks {
		if let Err(e) = task.await {
			warn!(error = %e, "poller task ended abnormally");
		}
	}

	info!("lolclip agent stopped");
	Ok(())
}

/// Wire the components and spawn both pollers.
fn start_agent(
	cfg: &AgentConfig,
	health: &HealthState,
	stop: watch::Receiver<bool>,
) -> anyhow::Result<Vec<tokio::task::JoinHandle<()>>> {
	let telemetry: Arc<dyn TelemetrySource> = Arc::new(
		LiveClient::new(LiveClientConfig {
			base_url: cfg.telemetry.base_url.clone(),
			request_timeout: cfg.telemetry.request_timeout,
		})
		.context("build telemetry client")?,
	);

	let obs = Arc::new(ObsClient::new(ObsConfig {
		url: cfg.obs.url.clone(),
		password: cfg.obs.password.clone(),
		request_timeout: cfg.obs.request_timeout,
		..ObsConfig::default()
	}));

	{
		let obs = Arc::clone(&obs);
		let health = health.clone();
		tokio::spawn(async move {
			match obs.ensure_connection().await {
				Ok(()) => health.set_obs_identified(true),
				Err(e) => warn!(error = %e, "obs not reachable yet; will connect on first replay"),
			}
		});
	}

	let dispatcher = Dispatcher::new(stop.clone());
	let identity = Arc::new(IdentityResolver::new(Arc::clone(&telemetry), cfg.telemetry.identity_ttl));
	let controller = Arc::new(ReplayTriggerController::new(
		cfg.trigger_rules(),
		identity,
		Arc::new(ObsReplay::new(obs, health.clone())),
	));
	if controller.register(&dispatcher) == 0 {
		warn!("no event kinds enabled in [trigger_events]; replays will never be saved");
	}

	let event_poller = EventPoller::new(
		Arc::clone(&telemetry),
		dispatcher.clone(),
		EventPollerConfig {
			interval: cfg.telemetry.event_poll_interval,
			liveness_probe: cfg.telemetry.liveness_probe,
			absent_interval: cfg.telemetry.absent_poll_interval,
		},
		health.clone(),
	);

	let sessions = event_poller.subscribe_sessions();
	let mut state_poller = StatePoller::new(
		telemetry,
		dispatcher,
		StatePollerConfig {
			interval: cfg.telemetry.state_poll_interval,
			teamfight: TeamFightConfig {
				window: cfg.teamfight.window,
				health_change_threshold: cfg.teamfight.health_change_threshold,
				min_deaths_per_team: cfg.teamfight.min_deaths_per_team,
			},
		},
	)
	.follow_sessions(sessions);
	if cfg.telemetry.liveness_probe {
		state_poller = state_poller.gated_on(health.clone());
	}

	Ok(vec![
		tokio::spawn(event_poller.run(stop.clone())),
		tokio::spawn(state_poller.run(stop)),
	])
}
