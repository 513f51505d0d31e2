use std::sync::{Arc, Mutex};

use crate::handlers::{Dispatcher, Event, EventHandler};
use crate::streamer::{Streamer, Streamers};

/// Remembers every event it is handed, with the streamer's channel id.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    events: Mutex<Vec<(String, Event)>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<(String, Event)> {
        self.events.lock().unwrap().clone()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &Event, streamer: &Arc<Streamer>) {
        self.events
            .lock()
            .unwrap()
            .push((streamer.channel_id.clone(), event.clone()));
    }
}

pub(crate) fn recording_dispatcher(streamers: Streamers) -> (Arc<Dispatcher>, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    let dispatcher = Arc::new(Dispatcher::new(streamers, handler.clone()));
    (dispatcher, handler)
}
