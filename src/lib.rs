//! # twitch-points-miner
//!
//! `twitch-points-miner` watches a set of Twitch channels on behalf of a user
//! and collects channel points automatically. It listens to Twitch PubSub over
//! a small pool of WebSocket connections, reacts to stream, points, raid and
//! prediction events, and reports watched minutes in the background.
//!
//! ## Core Modules
//!
//! - `config`: Loads settings from `config/default.toml` and `MINER__*` environment variables.
//! - `handlers`: Decodes PubSub payloads into events and acts on them.
//! - `miner`: Startup sequence, topic selection and the minute watcher.
//! - `pubsub`: Topics and the connection pool that keeps them subscribed.
//! - `streamer`: Per-channel state shared between tasks.
//! - `transport`: Wire frames, the per-connection state machine and the WebSocket connector.
//! - `twitch`: HTTP client for login, GQL and minute reporting.
//! - `utils`: Error types, logging setup and backoff.

pub mod config;
pub mod handlers;
pub mod miner;
pub mod pubsub;
pub mod streamer;
pub mod transport;
pub mod twitch;
pub mod utils;
