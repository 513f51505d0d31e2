//! The connection pool.
//!
//! The [`Pool`] owns every PubSub connection and the set of topic keys the
//! miner wants to receive. Topics are packed first-fit onto connections in the
//! order they were opened and a new connection is opened only when none has
//! room. When a connection dies its topics are resubscribed elsewhere with
//! exponential backoff, so the key set keeps being served without the caller
//! noticing.
//!
//! All changes to the connection list and key set go through one async
//! mutex. Connection tasks never take it; they report deaths over a channel
//! that the supervisor task drains.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PubSubSettings;
use crate::handlers::Dispatcher;
use crate::pubsub::topic::Topic;
use crate::transport::connection::{
    Connection, ConnectionContext, ConnectionSettings, ConnectionState, Connector, DeathNotice,
    flipped,
};
use crate::twitch::Session;
use crate::utils::backoff::ExponentialBackoff;
use crate::utils::error::{ConnectError, SubmitError};

const BACKOFF_FACTOR: f64 = 2.0;
const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub connection: ConnectionSettings,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl From<&PubSubSettings> for PoolSettings {
    fn from(settings: &PubSubSettings) -> Self {
        Self {
            connection: ConnectionSettings::from(settings),
            reconnect_initial: Duration::from_millis(settings.reconnect_initial_ms),
            reconnect_max: Duration::from_secs(settings.reconnect_max_secs),
        }
    }
}

struct PoolState {
    /// In opening order.
    connections: Vec<Arc<Connection>>,
    /// Desired topic keys.
    keys: HashSet<String>,
    next_id: u64,
}

pub struct Pool {
    settings: PoolSettings,
    auth_token: String,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    state: tokio::sync::Mutex<PoolState>,
    deaths: mpsc::UnboundedSender<DeathNotice>,
    cancel: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Creates an empty pool and starts its supervisor.
    pub fn new(
        settings: PoolSettings,
        session: &Session,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        let (deaths, death_rx) = mpsc::unbounded_channel();
        let (cancel, _) = watch::channel(false);

        let pool = Arc::new(Self {
            settings,
            auth_token: session.auth_token.clone(),
            connector,
            dispatcher,
            state: tokio::sync::Mutex::new(PoolState {
                connections: Vec::new(),
                keys: HashSet::new(),
                next_id: 1,
            }),
            deaths,
            cancel,
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise(Arc::downgrade(&pool), death_rx));
        *pool
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        pool
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Subscribes `topic` on the first connection with room.
    pub async fn submit(&self, topic: Topic) -> Result<(), SubmitError> {
        let mut state = self.state.lock().await;
        if self.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }
        if state.keys.contains(topic.key()) {
            return Err(SubmitError::DuplicateTopic(topic.key().to_string()));
        }

        let connection_id = self.assign(&mut state, &topic).await?;
        state.keys.insert(topic.key().to_string());
        info!(topic = %topic, connection_id, "Topic subscribed");
        Ok(())
    }

    /// Like [`Pool::submit`], but a transient failure keeps the key and
    /// retries in the background instead of returning the error.
    pub async fn submit_or_retry(self: &Arc<Self>, topic: Topic) -> Result<(), SubmitError> {
        match self.submit(topic.clone()).await {
            Err(e) if e.is_transient() => {
                warn!(topic = %topic, error = %e, "Subscribe failed, retrying in the background");
                if !self.state.lock().await.keys.insert(topic.key().to_string()) {
                    return Ok(());
                }
                tokio::spawn(self.clone().resubscribe(topic));
                Ok(())
            }
            other => other,
        }
    }

    /// Drops `key` from the desired set and sends UNLISTEN on its connection.
    pub async fn unsubscribe(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.keys.remove(key) {
            return false;
        }
        let owner = state.connections.iter().find(|c| c.unsubscribe(key));
        match owner {
            Some(connection) => info!(topic = key, connection_id = connection.id(), "Topic unsubscribed"),
            None => debug!(topic = key, "Unsubscribed a topic that was being resubscribed"),
        }
        true
    }

    /// Removes a dead connection and resubscribes its topics elsewhere.
    pub async fn on_connection_died(self: &Arc<Self>, connection_id: u64, orphaned: Vec<Topic>) {
        let dead = {
            let mut state = self.state.lock().await;
            state
                .connections
                .iter()
                .position(|c| c.id() == connection_id)
                .map(|idx| state.connections.remove(idx))
        };
        if let Some(connection) = dead {
            connection.close().await;
        }
        if self.is_shutting_down() || orphaned.is_empty() {
            return;
        }

        warn!(
            connection_id,
            orphaned = orphaned.len(),
            "Resubscribing topics of a dead connection"
        );
        join_all(orphaned.into_iter().map(|topic| self.clone().resubscribe(topic))).await;
    }

    /// Closes every connection. In-flight subscribes resolve immediately.
    pub async fn shutdown(&self) {
        let already = self.cancel.send_replace(true);

        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = supervisor {
            handle.abort();
        }

        let connections = self.state.lock().await.connections.clone();
        for connection in connections {
            connection.close().await;
        }
        if !already {
            info!("Pool shut down");
        }
    }

    /// Connections tracked by the pool, dead ones excluded.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Acknowledged topics per connection, in opening order.
    pub async fn topic_counts(&self) -> Vec<usize> {
        let state = self.state.lock().await;
        state.connections.iter().map(|c| c.topic_count()).collect()
    }

    /// Keys acknowledged on an open connection.
    pub async fn subscribed_keys(&self) -> HashSet<String> {
        let state = self.state.lock().await;
        state
            .connections
            .iter()
            .filter(|c| c.is_open())
            .flat_map(|c| c.topics())
            .map(|t| t.key().to_string())
            .collect()
    }

    /// Keys the pool is responsible for, including those being resubscribed.
    pub async fn desired_keys(&self) -> HashSet<String> {
        self.state.lock().await.keys.clone()
    }

    pub async fn connection_states(&self) -> Vec<(u64, ConnectionState)> {
        let state = self.state.lock().await;
        state
            .connections
            .iter()
            .map(|c| (c.id(), c.state()))
            .collect()
    }

    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.state.lock().await.connections.clone()
    }

    /// First-fit placement with a single retry on another connection.
    ///
    /// A connection opened for this topic is closed again when the subscribe
    /// fails and nothing else landed on it.
    async fn assign(&self, state: &mut PoolState, topic: &Topic) -> Result<u64, SubmitError> {
        let (connection, opened) = match first_fit(state) {
            Some(connection) => (connection, false),
            None => (self.open_connection(state).await?, true),
        };

        let e = match connection.subscribe(topic.clone()).await {
            Ok(()) => return Ok(connection.id()),
            Err(e) => e,
        };
        if opened {
            discard_if_idle(state, &connection).await;
        }
        if !e.is_retryable() || self.is_shutting_down() {
            return Err(e.into());
        }

        debug!(
            topic = %topic,
            connection_id = connection.id(),
            error = %e,
            "Retrying on another connection"
        );
        let (retry, opened) = match idle_connection(state, connection.id()) {
            Some(idle) => (idle, false),
            None => (self.open_connection(state).await?, true),
        };
        match retry.subscribe(topic.clone()).await {
            Ok(()) => Ok(retry.id()),
            Err(e) => {
                if opened {
                    discard_if_idle(state, &retry).await;
                }
                Err(e.into())
            }
        }
    }

    async fn open_connection(&self, state: &mut PoolState) -> Result<Arc<Connection>, ConnectError> {
        let id = state.next_id;
        state.next_id += 1;

        let ctx = ConnectionContext {
            settings: self.settings.connection.clone(),
            auth_token: self.auth_token.clone(),
            dispatcher: self.dispatcher.clone(),
            deaths: self.deaths.clone(),
            cancel: self.cancel.subscribe(),
        };
        let connection = Connection::open(id, self.connector.as_ref(), ctx).await?;
        state.connections.push(connection.clone());
        Ok(connection)
    }

    /// Keeps trying to place `topic` until it is subscribed, no longer
    /// wanted, permanently rejected or the pool shuts down.
    async fn resubscribe(self: Arc<Self>, topic: Topic) {
        let mut backoff = ExponentialBackoff::new(
            self.settings.reconnect_initial,
            self.settings.reconnect_max,
            BACKOFF_FACTOR,
            BACKOFF_JITTER_MS,
        );
        let mut cancel = self.cancel.subscribe();

        loop {
            let outcome = {
                let mut state = self.state.lock().await;
                if self.is_shutting_down() || !state.keys.contains(topic.key()) {
                    return;
                }
                let owned = state
                    .connections
                    .iter()
                    .any(|c| c.is_open() && c.contains(topic.key()));
                if owned {
                    return;
                }
                self.assign(&mut state, &topic).await
            };

            let e = match outcome {
                Ok(connection_id) => {
                    info!(topic = %topic, connection_id, "Topic resubscribed");
                    return;
                }
                Err(e) => e,
            };
            if self.is_shutting_down() {
                return;
            }
            if !e.is_transient() {
                error!(topic = %topic, error = %e, "Giving up on topic");
                self.state.lock().await.keys.remove(topic.key());
                return;
            }

            let delay = backoff.next_duration();
            warn!(topic = %topic, error = %e, delay_ms = delay.as_millis() as u64, "Resubscribe failed");
            tokio::select! {
                _ = flipped(&mut cancel) => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
        if let Some(handle) = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn first_fit(state: &PoolState) -> Option<Arc<Connection>> {
    state
        .connections
        .iter()
        .find(|c| c.is_open() && c.has_capacity())
        .cloned()
}

/// An open connection other than `except` that carries nothing.
fn idle_connection(state: &PoolState, except: u64) -> Option<Arc<Connection>> {
    state
        .connections
        .iter()
        .find(|c| c.id() != except && c.is_open() && c.load() == 0)
        .cloned()
}

async fn discard_if_idle(state: &mut PoolState, connection: &Arc<Connection>) {
    if connection.load() > 0 {
        return;
    }
    state.connections.retain(|c| c.id() != connection.id());
    connection.close().await;
    debug!(connection_id = connection.id(), "Closed unused connection");
}

async fn supervise(pool: Weak<Pool>, mut deaths: mpsc::UnboundedReceiver<DeathNotice>) {
    while let Some(notice) = deaths.recv().await {
        let Some(pool) = pool.upgrade() else {
            break;
        };
        debug!(
            connection_id = notice.connection_id,
            reason = %notice.reason,
            "Death notice received"
        );
        tokio::spawn(async move {
            pool.on_connection_died(notice.connection_id, notice.topics)
                .await;
        });
    }
}
