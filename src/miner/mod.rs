//! The `miner` module wires everything together.
//!
//! [`Miner::run`] logs in, resolves the configured streamers, loads their
//! state, starts the minute watcher and subscribes every topic through the
//! pool. It then waits for Ctrl-C and shuts everything down.

pub mod watcher;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{MinerSettings, Settings};
use crate::handlers::{Actions, Dispatcher, MinerHandler};
use crate::pubsub::{Pool, PoolSettings, Topic, TopicCategory};
use crate::streamer::{Streamer, Streamers};
use crate::transport::Connector;
use crate::transport::websocket::WebSocketConnector;
use crate::twitch::{Session, TwitchClient};
use crate::utils::error::MinerError;

use watcher::MinuteWatcher;

pub struct Miner {
    settings: Settings,
    connector: Arc<dyn Connector>,
}

impl Miner {
    pub fn new(settings: Settings) -> Self {
        let connector = Arc::new(WebSocketConnector::new(settings.pubsub.url.clone()));
        Self::with_connector(settings, connector)
    }

    /// Uses `connector` instead of opening WebSockets to the configured URL.
    pub fn with_connector(settings: Settings, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    /// Mines until Ctrl-C.
    pub async fn run(self) -> Result<(), MinerError> {
        self.run_until(ctrl_c()).await
    }

    /// Mines until `shutdown` completes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), MinerError> {
        let client = Arc::new(TwitchClient::new(self.settings.twitch.clone())?);
        let session = client.login().await?;

        let streamers = resolve_streamers(&client, &self.settings.miner.streamers).await;
        if streamers.is_empty() {
            return Err(MinerError::NoStreamers);
        }
        for streamer in &streamers {
            prepare(&client, streamer, self.settings.miner.claim_bonus).await;
        }
        let streamers = Streamers::new(streamers);

        let (stop, stop_rx) = watch::channel(false);
        let watcher = MinuteWatcher::new(
            streamers.clone(),
            client.clone(),
            Duration::from_secs(self.settings.miner.watch_interval_secs),
        )
        .spawn(stop_rx);

        let handler = MinerHandler::new(client.clone(), self.settings.miner.clone());
        let dispatcher = Arc::new(Dispatcher::new(streamers.clone(), Arc::new(handler)));
        let pool = Pool::new(
            PoolSettings::from(&self.settings.pubsub),
            &session,
            self.connector.clone(),
            dispatcher,
        );

        let topics = build_topics(&session, &streamers, &self.settings.miner);
        info!(
            streamers = streamers.len(),
            topics = topics.len(),
            "Subscribing"
        );
        let subscribe_all = async {
            for topic in topics {
                if let Err(e) = pool.submit_or_retry(topic.clone()).await {
                    warn!(topic = %topic, error = %e, "Topic not subscribed");
                }
            }
        };

        tokio::pin!(shutdown);
        let interrupted = tokio::select! {
            _ = subscribe_all => false,
            _ = &mut shutdown => true,
        };
        if !interrupted {
            info!("Mining, press Ctrl-C to stop");
            shutdown.await;
        }

        info!("Shutting down");
        pool.shutdown().await;
        stop.send_replace(true);
        if let Err(e) = watcher.await {
            warn!(error = %e, "Minute watcher ended abnormally");
        }
        Ok(())
    }
}

/// Resolves `names` to streamers, skipping the ones that do not exist.
pub async fn resolve_streamers(client: &TwitchClient, names: &[String]) -> Vec<Streamer> {
    let mut streamers: Vec<Streamer> = Vec::new();
    for name in names {
        let name = name.trim().to_lowercase();
        if name.is_empty() || streamers.iter().any(|s| s.name == name) {
            continue;
        }
        match client.resolve_channel(&name).await {
            Ok(channel_id) => streamers.push(Streamer::new(name, channel_id)),
            Err(e) => warn!(error = %e, "Skipping streamer"),
        }
    }
    streamers
}

/// Loads the points context and online status of one streamer.
async fn prepare(client: &TwitchClient, streamer: &Streamer, claim_bonus: bool) {
    if let Err(e) = client.load_context(streamer).await {
        warn!(streamer = %streamer.name, error = %e, "Failed to load points context");
    }

    let claim = streamer.snapshot().context.available_claim;
    if let (true, Some(claim_id)) = (claim_bonus, claim) {
        match client.claim_bonus(streamer, &claim_id).await {
            Ok(()) => {
                streamer.update(|state| state.context.available_claim = None);
                info!(streamer = %streamer.name, "Bonus claimed");
            }
            Err(e) => warn!(streamer = %streamer.name, error = %e, "Failed to claim bonus"),
        }
    }

    match client.probe_online(streamer).await {
        Ok(online) => info!(
            streamer = %streamer.name,
            online,
            balance = streamer.balance(),
            "Streamer ready"
        ),
        Err(e) => warn!(streamer = %streamer.name, error = %e, "Failed to check stream status"),
    }
}

/// The user's points topic plus the per-streamer topics enabled in `settings`.
pub fn build_topics(session: &Session, streamers: &Streamers, settings: &MinerSettings) -> Vec<Topic> {
    let mut categories = vec![TopicCategory::VideoPlayback];
    if settings.raid {
        categories.push(TopicCategory::Raid);
    }
    if settings.predictions {
        categories.push(TopicCategory::PredictionsChannel);
    }

    let user = Topic::user_points(&session.user_id);
    let per_streamer = streamers.iter().flat_map(|streamer| {
        categories
            .iter()
            .map(move |&category| Topic::for_streamer(category, streamer))
    });

    std::iter::once(user)
        .chain(per_streamer)
        .filter_map(|topic| match topic {
            Ok(topic) => Some(topic),
            Err(e) => {
                error!(error = %e, "Invalid topic");
                None
            }
        })
        .collect()
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
