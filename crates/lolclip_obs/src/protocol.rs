#![forbid(unsafe_code)]

//! obs-websocket v5 message shapes (only what the replay trigger needs).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub(crate) const OP_HELLO: u8 = 0;
pub(crate) const OP_IDENTIFY: u8 = 1;
pub(crate) const OP_IDENTIFIED: u8 = 2;
pub(crate) const OP_EVENT: u8 = 5;
pub(crate) const OP_REQUEST: u8 = 6;
pub(crate) const OP_REQUEST_RESPONSE: u8 = 7;

/// Every frame is `{ "op": <u8>, "d": { ... } }`.
#[derive(Debug, Deserialize)]
pub(crate) struct Frame {
	pub(crate) op: u8,
	#[serde(default)]
	pub(crate) d: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutFrame<T> {
	pub(crate) op: u8,
	pub(crate) d: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Hello {
	#[serde(default)]
	pub(crate) obs_web_socket_version: Option<String>,
	#[serde(default)]
	pub(crate) rpc_version: Option<u32>,
	#[serde(default)]
	pub(crate) authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthChallenge {
	pub(crate) challenge: String,
	pub(crate) salt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Identify {
	pub(crate) rpc_version: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub(crate) authentication: Option<String>,
	/// No event subscriptions: the agent only issues requests.
	pub(crate) event_subscriptions: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Request<'a> {
	pub(crate) request_type: &'a str,
	pub(crate) request_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestResponse {
	#[serde(default)]
	pub(crate) request_id: String,
	#[serde(default)]
	pub(crate) request_status: Option<RequestStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RequestStatus {
	pub(crate) result: bool,
	#[serde(default)]
	pub(crate) code: i64,
	#[serde(default)]
	pub(crate) comment: Option<String>,
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub(crate) fn authentication_string(password: &str, salt: &str, challenge: &str) -> String {
	let secret = BASE64_STANDARD.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
	BASE64_STANDARD.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identify_omits_missing_authentication() {
		let frame = OutFrame {
			op: OP_IDENTIFY,
			d: Identify {
				rpc_version: 1,
				authentication: None,
				event_subscriptions: 0,
			},
		};
		let v = serde_json::to_value(&frame).expect("serialize");
		assert_eq!(
			v,
			serde_json::json!({ "op": 1, "d": { "rpcVersion": 1, "eventSubscriptions": 0 } })
		);
	}

	#[test]
	fn request_uses_camel_case_fields() {
		let frame = OutFrame {
			op: OP_REQUEST,
			d: Request {
				request_type: "SaveReplayBuffer",
				request_id: "abc",
			},
		};
		let v = serde_json::to_value(&frame).expect("serialize");
		assert_eq!(
			v,
			serde_json::json!({ "op": 6, "d": { "requestType": "SaveReplayBuffer", "requestId": "abc" } })
		);
	}

	#[test]
	fn hello_with_challenge_parses() {
		let raw = r#"{"op":0,"d":{"obsWebSocketVersion":"5.4.2","rpcVersion":1,
			"authentication":{"challenge":"c1","salt":"s1"}}}"#;
		let frame: Frame = serde_json::from_str(raw).expect("frame");
		assert_eq!(frame.op, OP_HELLO);

		let hello: Hello = serde_json::from_value(frame.d).expect("hello");
		assert_eq!(hello.rpc_version, Some(1));
		assert_eq!(hello.obs_web_socket_version.as_deref(), Some("5.4.2"));
		let auth = hello.authentication.expect("challenge");
		assert_eq!(auth.challenge, "c1");
		assert_eq!(auth.salt, "s1");
	}

	#[test]
	fn authentication_depends_on_every_input() {
		let base = authentication_string("pw", "salt", "challenge");
		assert_eq!(base, authentication_string("pw", "salt", "challenge"));
		assert_ne!(base, authentication_string("pw2", "salt", "challenge"));
		assert_ne!(base, authentication_string("pw", "salt2", "challenge"));
		assert_ne!(base, authentication_string("pw", "salt", "challenge2"));
		// sha256 digest is 32 bytes -> 44 base64 chars.
		assert_eq!(base.len(), 44);
	}
}
