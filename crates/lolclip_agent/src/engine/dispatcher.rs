#![forbid(unsafe_code)]

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use lolclip_domain::{EventKind, GameEvent};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Something that reacts to a dispatched event.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + 'static {
	async fn handle(&self, event: Arc<GameEvent>) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
	F: Fn(Arc<GameEvent>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
	async fn handle(&self, event: Arc<GameEvent>) -> anyhow::Result<()> {
		(self.0)(event).await
	}
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
	F: Fn(Arc<GameEvent>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
	Arc::new(FnHandler(f))
}

/// Publish/subscribe hub keyed by event kind.
///
/// Every handler runs on its own task. A failing or panicking handler is
/// logged and never affects its siblings or the caller.
#[derive(Clone)]
pub struct Dispatcher {
	handlers: Arc<RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>>,
	shutdown: watch::Receiver<bool>,
}

/// Tasks spawned by one `dispatch` call.
#[derive(Debug, Default)]
pub struct Dispatched {
	handles: Vec<JoinHandle<()>>,
}

impl Dispatched {
	pub fn len(&self) -> usize {
		self.handles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handles.is_empty()
	}

	/// Wait for every spawned handler to finish.
	#[allow(dead_code)]
	pub async fn join(self) {
		for handle in self.handles {
			let _ = handle.await;
		}
	}
}

impl Dispatcher {
	/// Handlers still running when `shutdown` turns true are abandoned.
	pub fn new(shutdown: watch::Receiver<bool>) -> Self {
		Self {
			handlers: Arc::new(RwLock::new(HashMap::new())),
			shutdown,
		}
	}

	/// Append `handler` to the list for `kind`.
	pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
		let mut handlers = self.handlers.write();
		let list = handlers.entry(kind).or_default();
		list.push(handler);
		debug!(kind = %kind, handlers = list.len(), "dispatcher: handler registered");
	}

	#[allow(dead_code)]
	pub fn handler_count(&self, kind: EventKind) -> usize {
		self.handlers.read().get(&kind).map(Vec::len).unwrap_or(0)
	}

	/// Fan `event` out to every handler of `kind`. Returns once the handlers are
	/// scheduled, not when they finish.
	pub fn dispatch(&self, kind: EventKind, event: Arc<GameEvent>) -> Dispatched {
		let handlers = match self.handlers.read().get(&kind) {
			Some(list) if !list.is_empty() => list.clone(),
			_ => return Dispatched::default(),
		};

		metrics::counter!("lolclip_events_dispatched_total", "kind" => kind.as_str()).increment(1);

		let handles = handlers
			.into_iter()
			.map(|handler| {
				let event = Arc::clone(&event);
				let mut shutdown = self.shutdown.clone();
				tokio::spawn(async move {
					let event_id = event.id();
					let run = AssertUnwindSafe(handler.handle(event)).catch_unwind();

					tokio::select! {
						res = run => match res {
							Ok(Ok(())) => {}
							Ok(Err(e)) => error!(kind = %kind, event_id, error = %format!("{e:#}"), "event handler failed"),
							Err(panic) => error!(kind = %kind, event_id, panic = %panic_message(panic.as_ref()), "event handler panicked"),
						},
						_ = stopped(&mut shutdown) => {
							debug!(kind = %kind, event_id, "event handler abandoned at shutdown");
						}
					}
				})
			})
			.collect();

		Dispatched { handles }
	}
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
	if rx.wait_for(|stop| *stop).await.is_err() {
		// Sender gone without a stop: never abandon.
		std::future::pending::<()>().await;
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
