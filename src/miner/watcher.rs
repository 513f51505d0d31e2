//! Periodic "minute watched" reporting.
//!
//! Channel points accrue only while the platform believes the user is
//! watching. The [`MinuteWatcher`] runs on its own task and, once per
//! interval, reports a minute for each of the first two online streamers,
//! spreading the requests evenly over the interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::streamer::{Streamer, Streamers};
use crate::transport::connection::flipped;
use crate::utils::error::ApiError;

/// The platform credits at most this many streams at once.
pub const MAX_WATCHED_STREAMS: usize = 2;

#[async_trait]
pub trait WatchReporter: Send + Sync + 'static {
    async fn report_minute(&self, streamer: &Streamer) -> Result<(), ApiError>;
}

pub struct MinuteWatcher {
    streamers: Streamers,
    reporter: Arc<dyn WatchReporter>,
    interval: Duration,
}

impl MinuteWatcher {
    pub fn new(streamers: Streamers, reporter: Arc<dyn WatchReporter>, interval: Duration) -> Self {
        Self {
            streamers,
            reporter,
            interval,
        }
    }

    /// Runs the watcher until `stop` flips to `true`.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        debug!(interval_secs = self.interval.as_secs(), "Minute watcher started");
        loop {
            let watched: Vec<Arc<Streamer>> = self
                .streamers
                .online()
                .into_iter()
                .take(MAX_WATCHED_STREAMS)
                .collect();

            if watched.is_empty() {
                trace!("No stream online");
                if !pause(&mut stop, self.interval).await {
                    break;
                }
                continue;
            }

            let spacing = self.interval / watched.len() as u32;
            for streamer in watched {
                if let Err(e) = self.reporter.report_minute(&streamer).await {
                    warn!(streamer = %streamer.name, error = %e, "Failed to report watched minute");
                }
                if !pause(&mut stop, spacing).await {
                    debug!("Minute watcher stopped");
                    return;
                }
            }
        }
        debug!("Minute watcher stopped");
    }
}

/// Sleeps for `period`. Returns `false` if told to stop first.
async fn pause(stop: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        biased;
        _ = flipped(stop) => false,
        _ = tokio::time::sleep(period) => true,
    }
}
