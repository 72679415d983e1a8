#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::authentication_string;
use crate::{ConnectionState, ObsClient, ObsConfig, ObsError, SecretString};

#[derive(Clone, Copy)]
enum OnRequest {
	Ack,
	Reject,
	Drop,
}

#[derive(Clone)]
struct Script {
	challenge: Option<(&'static str, &'static str, &'static str)>,
	on_request: OnRequest,
}

impl Script {
	fn ack() -> Self {
		Self {
			challenge: None,
			on_request: OnRequest::Ack,
		}
	}

	fn drop_on_request() -> Self {
		Self {
			challenge: None,
			on_request: OnRequest::Drop,
		}
	}
}

struct FakeObs {
	addr: SocketAddr,
	connections: Arc<AtomicUsize>,
}

impl FakeObs {
	fn connections(&self) -> usize {
		self.connections.load(Ordering::SeqCst)
	}

	fn client(&self, password: Option<&str>) -> ObsClient {
		ObsClient::new(ObsConfig {
			url: format!("ws://{}", self.addr),
			password: password.map(SecretString::new),
			rpc_version: 1,
			request_timeout: Duration::from_secs(2),
		})
	}
}

/// Each accepted connection follows the next script; the last one repeats.
async fn spawn_fake_obs(scripts: Vec<Script>) -> FakeObs {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");
	let connections = Arc::new(AtomicUsize::new(0));

	let counter = connections.clone();
	tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else {
				return;
			};
			let n = counter.fetch_add(1, Ordering::SeqCst);
			let script = scripts
				.get(n)
				.or_else(|| scripts.last())
				.cloned()
				.unwrap_or_else(Script::ack);
			tokio::spawn(serve(stream, script));
		}
	});

	FakeObs { addr, connections }
}

async fn next_json(ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>) -> Option<Value> {
	while let Some(Ok(msg)) = ws.next().await {
		if let Message::Text(text) = msg {
			return serde_json::from_str(&text).ok();
		}
	}
	None
}

async fn send_json(ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>, v: Value) {
	let _ = ws.send(Message::Text(v.to_string().into())).await;
}

async fn serve(stream: TcpStream, script: Script) {
	let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
		return;
	};

	let mut hello = json!({ "op": 0, "d": { "obsWebSocketVersion": "5.4.2", "rpcVersion": 1 } });
	if let Some((_, salt, challenge)) = script.challenge {
		hello["d"]["authentication"] = json!({ "challenge": challenge, "salt": salt });
	}
	send_json(&mut ws, hello).await;

	let Some(identify) = next_json(&mut ws).await else {
		return;
	};
	assert_eq!(identify["op"], 1);
	assert_eq!(identify["d"]["rpcVersion"], 1);

	if let Some((password, salt, challenge)) = script.challenge {
		let expected = authentication_string(password, salt, challenge);
		if identify["d"]["authentication"] != Value::String(expected) {
			let _ = ws.close(None).await;
			return;
		}
	}
	send_json(&mut ws, json!({ "op": 2, "d": { "negotiatedRpcVersion": 1 } })).await;

	while let Some(req) = next_json(&mut ws).await {
		assert_eq!(req["op"], 6);
		assert_eq!(req["d"]["requestType"], "SaveReplayBuffer");
		let request_id = req["d"]["requestId"].clone();

		match script.on_request {
			OnRequest::Drop => return,
			OnRequest::Ack => {
				// Noise the client has to skip.
				send_json(&mut ws, json!({ "op": 5, "d": { "eventType": "ReplayBufferSaved" } })).await;
				send_json(
					&mut ws,
					json!({ "op": 7, "d": { "requestType": "SaveReplayBuffer", "requestId": "someone-else",
						"requestStatus": { "result": false, "code": 600 } } }),
				)
				.await;
				send_json(
					&mut ws,
					json!({ "op": 7, "d": { "requestType": "SaveReplayBuffer", "requestId": request_id,
						"requestStatus": { "result": true, "code": 100 } } }),
				)
				.await;
			}
			OnRequest::Reject => {
				send_json(
					&mut ws,
					json!({ "op": 7, "d": { "requestType": "SaveReplayBuffer", "requestId": request_id,
						"requestStatus": { "result": false, "code": 501, "comment": "Replay buffer is not active." } } }),
				)
				.await;
			}
		}
	}
}

#[tokio::test]
async fn identified_connection_is_reused_across_saves() {
	let obs = spawn_fake_obs(vec![Script::ack()]).await;
	let client = obs.client(None);

	assert_eq!(client.state(), ConnectionState::Disconnected);
	client.save_replay_buffer().await.expect("first save");
	client.save_replay_buffer().await.expect("second save");

	assert_eq!(client.state(), ConnectionState::Identified);
	assert_eq!(obs.connections(), 1);
	assert_eq!(client.connect_attempts(), 1);
}

#[tokio::test]
async fn failed_send_forces_reconnect_on_next_save() {
	let obs = spawn_fake_obs(vec![Script::drop_on_request(), Script::ack()]).await;
	let client = obs.client(None);

	let err = client.save_replay_buffer().await.expect_err("server dropped the socket");
	assert!(matches!(err, ObsError::Closed(_)), "got {err:?}");
	assert_eq!(client.state(), ConnectionState::Disconnected);

	client.save_replay_buffer().await.expect("reconnected save");
	assert_eq!(client.state(), ConnectionState::Identified);
	assert_eq!(obs.connections(), 2);
}

#[tokio::test]
async fn consecutive_failures_each_tear_down_without_looping() {
	let obs = spawn_fake_obs(vec![Script::drop_on_request(), Script::drop_on_request(), Script::ack()]).await;
	let client = obs.client(None);

	assert!(client.save_replay_buffer().await.is_err());
	assert_eq!(obs.connections(), 1);

	assert!(client.save_replay_buffer().await.is_err());
	assert_eq!(obs.connections(), 2);
	assert_eq!(client.state(), ConnectionState::Disconnected);

	client.save_replay_buffer().await.expect("third attempt succeeds");
	assert_eq!(obs.connections(), 3);
}

#[tokio::test]
async fn password_answers_the_challenge() {
	let obs = spawn_fake_obs(vec![Script {
		challenge: Some(("hunter2", "c2FsdA==", "Y2hhbGxlbmdl")),
		on_request: OnRequest::Ack,
	}])
	.await;
	let client = obs.client(Some("hunter2"));

	client.ensure_connection().await.expect("identified");
	assert_eq!(client.state(), ConnectionState::Identified);
	client.save_replay_buffer().await.expect("save");
}

#[tokio::test]
async fn wrong_password_is_an_auth_error() {
	let obs = spawn_fake_obs(vec![Script {
		challenge: Some(("hunter2", "c2FsdA==", "Y2hhbGxlbmdl")),
		on_request: OnRequest::Ack,
	}])
	.await;
	let client = obs.client(Some("letmein"));

	let err = client.ensure_connection().await.expect_err("bad password");
	assert!(matches!(err, ObsError::Auth(_)), "got {err:?}");
	assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn challenge_without_password_is_an_auth_error() {
	let obs = spawn_fake_obs(vec![Script {
		challenge: Some(("hunter2", "c2FsdA==", "Y2hhbGxlbmdl")),
		on_request: OnRequest::Ack,
	}])
	.await;
	let client = obs.client(None);

	let err = client.save_replay_buffer().await.expect_err("no password configured");
	assert!(matches!(err, ObsError::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn rejected_request_surfaces_code_and_comment() {
	let obs = spawn_fake_obs(vec![Script {
		challenge: None,
		on_request: OnRequest::Reject,
	}])
	.await;
	let client = obs.client(None);

	match client.save_replay_buffer().await {
		Err(ObsError::RequestFailed { code, comment }) => {
			assert_eq!(code, 501);
			assert_eq!(comment, "Replay buffer is not active.");
		}
		other => panic!("expected RequestFailed, got {other:?}"),
	}
	assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");
	drop(listener);

	let client = ObsClient::new(ObsConfig {
		url: format!("ws://{addr}"),
		request_timeout: Duration::from_secs(1),
		..ObsConfig::default()
	});

	let err = client.save_replay_buffer().await.expect_err("nothing listening");
	assert!(matches!(err, ObsError::Connect(_)), "got {err:?}");
	assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn silent_server_times_out_waiting_for_hello() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");
	tokio::spawn(async move {
		if let Ok((stream, _)) = listener.accept().await
			&& let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await
		{
			while ws.next().await.is_some() {}
		}
	});

	let client = ObsClient::new(ObsConfig {
		url: format!("ws://{addr}"),
		request_timeout: Duration::from_millis(200),
		..ObsConfig::default()
	});

	let err = client.ensure_connection().await.expect_err("no Hello");
	assert!(matches!(err, ObsError::Timeout("Hello")), "got {err:?}");
}

#[tokio::test]
async fn concurrent_saves_share_one_connection() {
	let obs = spawn_fake_obs(vec![Script::ack()]).await;
	let client = obs.client(None);

	let (a, b) = tokio::join!(client.save_replay_buffer(), client.save_replay_buffer());
	a.expect("first");
	b.expect("second");
	assert_eq!(obs.connections(), 1);
}

#[test]
fn secret_is_redacted() {
	let s = SecretString::new("hunter2");
	assert_eq!(format!("{s}"), "<redacted>");
	assert!(!format!("{s:?}").contains("hunter2"));
	assert_eq!(s.expose(), "hunter2");
}
