#![forbid(unsafe_code)]

mod client;
mod protocol;

#[cfg(test)]
mod client_tests;

use std::fmt;
use std::time::Duration;

pub use client::ObsClient;

/// Control channel settings.
#[derive(Debug, Clone)]
pub struct ObsConfig {
	/// `ws://host:port` of obs-websocket.
	pub url: String,

	/// Optional shared secret.
	pub password: Option<SecretString>,

	pub rpc_version: u32,

	/// Bound on connect and on every awaited reply.
	pub request_timeout: Duration,
}

impl Default for ObsConfig {
	fn default() -> Self {
		Self {
			url: "ws://127.0.0.1:4455".to_string(),
			password: None,
			rpc_version: 1,
			request_timeout: Duration::from_secs(2),
		}
	}
}

/// Lifecycle of the single control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Identified,
}

/// Control channel errors. Every variant leaves the client `Disconnected`.
#[derive(Debug, thiserror::Error)]
pub enum ObsError {
	#[error("failed to connect: {0}")]
	Connect(String),

	#[error("handshake failed: {0}")]
	Handshake(String),

	#[error("authentication failed: {0}")]
	Auth(String),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("timed out waiting for {0}")]
	Timeout(&'static str),

	#[error("request rejected (code {code}): {comment}")]
	RequestFailed { code: i64, comment: String },

	#[error("connection closed: {0}")]
	Closed(String),
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}
