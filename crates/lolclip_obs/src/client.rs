#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::protocol::{
	Frame, Hello, Identify, OP_EVENT, OP_HELLO, OP_IDENTIFIED, OP_IDENTIFY, OP_REQUEST, OP_REQUEST_RESPONSE, OutFrame,
	Request, RequestResponse, authentication_string,
};
use crate::{ConnectionState, ObsConfig, ObsError};

pub(crate) type ObsWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Owner of the one persistent control connection.
///
/// Both operations hold the connection lock for their whole duration, so no
/// caller can observe a half-identified socket.
pub struct ObsClient {
	cfg: ObsConfig,
	conn: Mutex<Option<ObsWs>>,
	state: parking_lot::Mutex<ConnectionState>,
	connect_attempts: AtomicU64,
}

impl ObsClient {
	pub fn new(cfg: ObsConfig) -> Self {
		Self {
			cfg,
			conn: Mutex::new(None),
			state: parking_lot::Mutex::new(ConnectionState::Disconnected),
			connect_attempts: AtomicU64::new(0),
		}
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.lock()
	}

	/// Number of connection attempts made so far.
	pub fn connect_attempts(&self) -> u64 {
		self.connect_attempts.load(Ordering::Relaxed)
	}

	fn set_state(&self, state: ConnectionState) {
		*self.state.lock() = state;
	}

	/// Connect and identify unless already identified.
	pub async fn ensure_connection(&self) -> Result<(), ObsError> {
		let mut slot = self.conn.lock().await;
		self.ensure_locked(&mut slot).await.map(|_| ())
	}

	/// Ask OBS to flush its replay buffer to disk. Never retries.
	pub async fn save_replay_buffer(&self) -> Result<(), ObsError> {
		let mut slot = self.conn.lock().await;
		let ws = self.ensure_locked(&mut slot).await?;

		let request_id = Uuid::new_v4().to_string();
		let res = self.request(ws, "SaveReplayBuffer", &request_id).await;

		match &res {
			Ok(()) => info!(%request_id, "replay buffer save acknowledged"),
			Err(e) => {
				error!(%request_id, error = %e, "replay buffer save failed; dropping control connection");
				slot.take();
				self.set_state(ConnectionState::Disconnected);
			}
		}

		res
	}

	async fn ensure_locked<'a>(&self, slot: &'a mut Option<ObsWs>) -> Result<&'a mut ObsWs, ObsError> {
		if slot.is_none() {
			self.set_state(ConnectionState::Connecting);
			let attempt = self.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;

			match self.connect_and_identify().await {
				Ok(ws) => {
					info!(url = %self.cfg.url, attempt, "control channel identified");
					*slot = Some(ws);
					self.set_state(ConnectionState::Identified);
				}
				Err(e) => {
					error!(url = %self.cfg.url, attempt, error = %e, "control channel connect/identify failed");
					self.set_state(ConnectionState::Disconnected);
					return Err(e);
				}
			}
		}

		slot.as_mut()
			.ok_or_else(|| ObsError::Protocol("connection slot empty after identify".to_string()))
	}

	async fn connect_and_identify(&self) -> Result<ObsWs, ObsError> {
		let (mut ws, _resp) = timeout(
			self.cfg.request_timeout,
			tokio_tungstenite::connect_async(self.cfg.url.as_str()),
		)
		.await
		.map_err(|_| ObsError::Timeout("connect"))?
		.map_err(|e| ObsError::Connect(e.to_string()))?;

		let hello: Hello = self.expect_op(&mut ws, OP_HELLO, "Hello").await?;
		debug!(
			obs_websocket = ?hello.obs_web_socket_version,
			rpc_version = ?hello.rpc_version,
			auth_required = hello.authentication.is_some(),
			"received Hello"
		);

		let authentication = match (hello.authentication, &self.cfg.password) {
			(Some(ch), Some(password)) => Some(authentication_string(password.expose(), &ch.salt, &ch.challenge)),
			(Some(_), None) => {
				return Err(ObsError::Auth(
					"server requires a password but none is configured".to_string(),
				));
			}
			(None, _) => None,
		};

		let identify = OutFrame {
			op: OP_IDENTIFY,
			d: Identify {
				rpc_version: self.cfg.rpc_version,
				authentication,
				event_subscriptions: 0,
			},
		};
		send_json(&mut ws, &identify).await?;

		let _: serde_json::Value = self
			.expect_op(&mut ws, OP_IDENTIFIED, "Identified")
			.await
			.map_err(|e| match e {
				// obs-websocket answers a bad password by closing the socket.
				ObsError::Closed(reason) => ObsError::Auth(format!("closed during identify: {reason}")),
				other => other,
			})?;

		Ok(ws)
	}

	async fn request(&self, ws: &mut ObsWs, request_type: &str, request_id: &str) -> Result<(), ObsError> {
		let frame = OutFrame {
			op: OP_REQUEST,
			d: Request {
				request_type,
				request_id,
			},
		};
		send_json(ws, &frame).await?;

		let deadline = Instant::now() + self.cfg.request_timeout;
		loop {
			let frame = next_frame(ws, deadline, "RequestResponse").await?;
			match frame.op {
				OP_REQUEST_RESPONSE => {
					let resp: RequestResponse = serde_json::from_value(frame.d)
						.map_err(|e| ObsError::Protocol(format!("bad RequestResponse: {e}")))?;
					if resp.request_id != request_id {
						debug!(got = %resp.request_id, want = %request_id, "skipping response to another request");
						continue;
					}
					return match resp.request_status {
						Some(status) if !status.result => Err(ObsError::RequestFailed {
							code: status.code,
							comment: status.comment.unwrap_or_default(),
						}),
						_ => Ok(()),
					};
				}
				OP_EVENT => continue,
				other => debug!(op = other, "ignoring unexpected frame while awaiting response"),
			}
		}
	}

	async fn expect_op<T: DeserializeOwned>(&self, ws: &mut ObsWs, op: u8, what: &'static str) -> Result<T, ObsError> {
		let deadline = Instant::now() + self.cfg.request_timeout;
		let frame = next_frame(ws, deadline, what).await?;
		if frame.op != op {
			return Err(ObsError::Handshake(format!("expected {what} (op {op}), got op {}", frame.op)));
		}
		serde_json::from_value(frame.d).map_err(|e| ObsError::Handshake(format!("bad {what}: {e}")))
	}
}

async fn send_json<T: Serialize>(ws: &mut ObsWs, frame: &T) -> Result<(), ObsError> {
	let text = serde_json::to_string(frame).map_err(|e| ObsError::Protocol(format!("encode: {e}")))?;
	ws.send(Message::Text(text.into()))
		.await
		.map_err(|e| ObsError::Closed(format!("send failed: {e}")))
}

async fn next_frame(ws: &mut ObsWs, deadline: Instant, what: &'static str) -> Result<Frame, ObsError> {
	loop {
		let msg = timeout_at(deadline, ws.next())
			.await
			.map_err(|_| ObsError::Timeout(what))?;

		match msg {
			None => return Err(ObsError::Closed("stream ended".to_string())),
			Some(Err(e)) => return Err(ObsError::Closed(e.to_string())),
			Some(Ok(Message::Text(text))) => {
				return serde_json::from_str::<Frame>(&text).map_err(|e| ObsError::Protocol(format!("bad frame: {e}")));
			}
			Some(Ok(Message::Close(frame))) => {
				let reason = frame
					.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
					.unwrap_or_else(|| "no close frame".to_string());
				return Err(ObsError::Closed(reason));
			}
			Some(Ok(_)) => continue,
		}
	}
}
