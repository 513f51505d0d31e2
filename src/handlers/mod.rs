//! The `handlers` module turns PubSub messages into reactions.
//!
//! The [`Dispatcher`] is called by every connection's reader for each
//! `MESSAGE` frame. It decodes the payload by topic category, finds the
//! streamer the event concerns and hands both to an [`EventHandler`].
//! Handlers run on the reader task, so they must return quickly and push any
//! network work onto a spawned task.

pub mod events;
pub mod miner;

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::pubsub::topic::Topic;
use crate::streamer::{Streamer, Streamers};

pub use events::Event;
pub use miner::{Actions, MinerHandler};

/// Reaction to a decoded event.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event, streamer: &Arc<Streamer>);
}

pub struct Dispatcher {
    streamers: Streamers,
    handler: Arc<dyn EventHandler>,
}

impl Dispatcher {
    pub fn new(streamers: Streamers, handler: Arc<dyn EventHandler>) -> Self {
        Self { streamers, handler }
    }

    pub fn streamers(&self) -> &Streamers {
        &self.streamers
    }

    /// Decodes and routes one payload. Returns `true` if a handler ran.
    pub fn dispatch(&self, topic: &Topic, payload: &str) -> bool {
        let decoded = match events::decode(topic, payload) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                trace!(topic = %topic, "Ignoring message type");
                return false;
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping malformed payload");
                return false;
            }
        };

        let Some(streamer) = self.streamers.by_channel_id(&decoded.channel_id) else {
            debug!(
                topic = %topic,
                channel_id = %decoded.channel_id,
                "Event for a channel that is not watched"
            );
            return false;
        };

        trace!(topic = %topic, streamer = %streamer.name, event = decoded.event.name(), "Dispatching");
        self.handler.handle(&decoded.event, streamer);
        true
    }
}

#[cfg(test)]
pub(crate) mod recording;
