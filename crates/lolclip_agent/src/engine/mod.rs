#![forbid(unsafe_code)]

pub mod dispatcher;
pub mod event_poller;
pub mod health;
pub mod identity;
pub mod state_poller;
pub mod trigger;

#[cfg(test)]
mod fake_source;
