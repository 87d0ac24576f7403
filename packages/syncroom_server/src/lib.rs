#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod admin;
pub mod api;
pub mod channel;
pub mod config;
pub mod models;
pub mod reaper;
pub mod rooms;
pub mod sessions;
pub mod ws;

#[cfg(test)]
mod test_utils;

/// Connection ID.
pub type ConnId = u64;

/// Room ID.
pub type RoomId = String;

/// Serialized frame sent to a connection.
pub type Msg = String;

/// Milliseconds since the unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
