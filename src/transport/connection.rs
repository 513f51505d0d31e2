//! One PubSub connection.
//!
//! A [`Connection`] owns a [`Link`] to the platform, the topics acknowledged
//! on it and the LISTEN requests still waiting for a `RESPONSE`. It runs two
//! tasks: the reader, which decodes frames in arrival order and dispatches
//! them, and the heartbeat, which sends `PING` and watches for `PONG`.
//!
//! A connection never reconnects itself. When the transport ends, the
//! heartbeat gives up or the server sends `RECONNECT`, it reports a single
//! [`DeathNotice`] carrying its topic set and stops; the pool takes it from
//! there.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::config::PubSubSettings;
use crate::handlers::Dispatcher;
use crate::pubsub::topic::Topic;
use crate::transport::message::{ClientFrame, MessageData, ResponseError, ServerFrame, new_nonce};
use crate::utils::error::{ConnectError, SubscribeError};

/// Both directions of an established transport.
///
/// Dropping `sender` asks the transport to close; `receiver` yields `None`
/// once the transport is gone.
#[derive(Debug)]
pub struct Link {
    pub sender: mpsc::UnboundedSender<WsMessage>,
    pub receiver: mpsc::UnboundedReceiver<WsMessage>,
}

/// Opens transports to the PubSub endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Link, ConnectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_topics: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_missed_pongs: u32,
    pub ack_timeout: Duration,
}

impl From<&PubSubSettings> for ConnectionSettings {
    fn from(settings: &PubSubSettings) -> Self {
        Self {
            max_topics: settings.max_topics_per_connection,
            ping_interval: Duration::from_secs(settings.ping_interval_secs),
            pong_timeout: Duration::from_secs(settings.pong_timeout_secs),
            max_missed_pongs: settings.max_missed_pongs,
            ack_timeout: Duration::from_secs(settings.ack_timeout_secs),
        }
    }
}

/// Sent to the pool exactly once when a connection dies on its own.
#[derive(Debug)]
pub struct DeathNotice {
    pub connection_id: u64,
    pub topics: Vec<Topic>,
    pub reason: String,
}

/// Everything a connection receives from the pool that opens it.
#[derive(Clone)]
pub struct ConnectionContext {
    pub settings: ConnectionSettings,
    pub auth_token: String,
    pub dispatcher: Arc<Dispatcher>,
    pub deaths: mpsc::UnboundedSender<DeathNotice>,
    /// Pool-wide cancellation; in-flight subscribes give up when it flips to `true`.
    pub cancel: watch::Receiver<bool>,
}

struct PendingRequest {
    topic: Topic,
    reply: oneshot::Sender<Result<(), ResponseError>>,
}

struct Shared {
    id: u64,
    settings: ConnectionSettings,
    auth_token: String,
    dispatcher: Arc<Dispatcher>,
    deaths: mpsc::UnboundedSender<DeathNotice>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    topics: Mutex<HashMap<String, Topic>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    state: Mutex<ConnectionState>,
    last_activity: Mutex<Instant>,
    finished: AtomicBool,
    pong: Notify,
    stop: watch::Sender<bool>,
}

pub struct Connection {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: watch::Receiver<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once `rx` holds `true`. Never resolves if the sender is gone.
pub(crate) async fn flipped(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|set| *set).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl Connection {
    /// Establishes the transport and starts the reader and heartbeat tasks.
    pub async fn open(
        id: u64,
        connector: &dyn Connector,
        ctx: ConnectionContext,
    ) -> Result<Arc<Self>, ConnectError> {
        debug!(connection_id = id, "Connecting");
        let mut cancel = ctx.cancel.clone();
        let link = tokio::select! {
            biased;
            _ = flipped(&mut cancel) => return Err(ConnectError::Cancelled),
            link = connector.connect() => link?,
        };

        let (stop, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            id,
            settings: ctx.settings,
            auth_token: ctx.auth_token,
            dispatcher: ctx.dispatcher,
            deaths: ctx.deaths,
            outbound: Mutex::new(Some(link.sender)),
            topics: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(ConnectionState::Connecting),
            last_activity: Mutex::new(Instant::now()),
            finished: AtomicBool::new(false),
            pong: Notify::new(),
            stop,
        });

        let reader = tokio::spawn(read_loop(
            shared.clone(),
            link.receiver,
            shared.stop.subscribe(),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(shared.clone(), shared.stop.subscribe()));

        *lock(&shared.state) = ConnectionState::Open;
        info!(connection_id = id, "Connection open");

        Ok(Arc::new(Self {
            shared,
            tasks: Mutex::new(vec![reader, heartbeat]),
            cancel: ctx.cancel,
        }))
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Acknowledged topics plus requests still in flight.
    pub fn load(&self) -> usize {
        let topics = lock(&self.shared.topics);
        let pending = lock(&self.shared.pending);
        topics.len() + pending.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.load() < self.shared.settings.max_topics
    }

    pub fn topic_count(&self) -> usize {
        lock(&self.shared.topics).len()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    pub fn topics(&self) -> Vec<Topic> {
        lock(&self.shared.topics).values().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.shared.topics).contains_key(key)
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.shared.last_activity)
    }

    /// Sends `LISTEN` for `topic` and waits for the platform's answer.
    ///
    /// The pending entry is gone by the time this returns, whatever the outcome.
    pub async fn subscribe(&self, topic: Topic) -> Result<(), SubscribeError> {
        let id = self.shared.id;
        if !self.is_open() {
            return Err(SubscribeError::ConnectionClosed(id));
        }

        let nonce = new_nonce();
        let (reply, ack) = oneshot::channel();
        {
            let topics = lock(&self.shared.topics);
            let mut pending = lock(&self.shared.pending);
            if topics.len() + pending.len() >= self.shared.settings.max_topics {
                return Err(SubscribeError::CapacityExceeded {
                    connection_id: id,
                    limit: self.shared.settings.max_topics,
                });
            }
            pending.insert(
                nonce.clone(),
                PendingRequest {
                    topic: topic.clone(),
                    reply,
                },
            );
        }

        let frame = ClientFrame::listen(nonce.clone(), topic.key(), &self.shared.auth_token);
        if !self.shared.send(&frame) {
            self.shared.abandon(&nonce, topic.key());
            return Err(SubscribeError::ConnectionClosed(id));
        }
        debug!(connection_id = id, topic = %topic, nonce = %nonce, "LISTEN sent");

        let mut cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = flipped(&mut cancel) => Err(SubscribeError::AckTimeout {
                connection_id: id,
                topic: topic.key().to_string(),
            }),
            reply = ack => match reply {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(SubscribeError::Rejected {
                    topic: topic.key().to_string(),
                    error,
                }),
                Err(_) => Err(SubscribeError::ConnectionClosed(id)),
            },
            _ = tokio::time::sleep(self.shared.settings.ack_timeout) => Err(SubscribeError::AckTimeout {
                connection_id: id,
                topic: topic.key().to_string(),
            }),
        };

        if outcome.is_err() && self.shared.abandon(&nonce, topic.key()) {
            // The RESPONSE landed after we stopped waiting; undo it so the
            // caller's view (not subscribed here) stays true.
            self.shared.send(&ClientFrame::unlisten(new_nonce(), topic.key()));
        }

        match &outcome {
            Ok(()) => debug!(connection_id = id, topic = %topic, "Subscribed"),
            Err(e) => warn!(connection_id = id, topic = %topic, error = %e, "Subscribe failed"),
        }
        outcome
    }

    /// Sends `UNLISTEN` and frees the slot. Returns `false` if the topic is not here.
    pub fn unsubscribe(&self, key: &str) -> bool {
        if lock(&self.shared.topics).remove(key).is_none() {
            return false;
        }
        self.shared.send(&ClientFrame::unlisten(new_nonce(), key));
        debug!(connection_id = self.shared.id, topic = key, "UNLISTEN sent");
        true
    }

    /// Stops both tasks, resolves every pending request and drops the link.
    ///
    /// Idempotent; does not report death.
    pub async fn close(&self) {
        self.shared.finish(ConnectionState::Closing);
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        *lock(&self.shared.state) = ConnectionState::Closed;
        debug!(connection_id = self.shared.id, "Connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.finish(ConnectionState::Closed);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl Shared {
    fn send(&self, frame: &ClientFrame) -> bool {
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(frame.to_ws()).is_ok(),
            None => false,
        }
    }

    /// Drops the pending entry for `nonce`. Returns `true` when the request had
    /// already been acknowledged, in which case the topic is removed again.
    fn abandon(&self, nonce: &str, key: &str) -> bool {
        let mut topics = lock(&self.topics);
        let mut pending = lock(&self.pending);
        if pending.remove(nonce).is_some() {
            return false;
        }
        topics.remove(key).is_some()
    }

    /// Marks the connection finished. Returns `false` if it already was.
    fn finish(&self, state: ConnectionState) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        *lock(&self.state) = state;
        let _ = self.stop.send(true);
        // Dropping the reply senders resolves every waiter with ConnectionClosed.
        lock(&self.pending).clear();
        lock(&self.outbound).take();
        true
    }

    fn report_death(&self, reason: &str) {
        if !self.finish(ConnectionState::Closing) {
            return;
        }
        let topics: Vec<Topic> = lock(&self.topics).values().cloned().collect();
        *lock(&self.state) = ConnectionState::Closed;
        warn!(
            connection_id = self.id,
            reason,
            topics = topics.len(),
            "Connection died"
        );
        let _ = self.deaths.send(DeathNotice {
            connection_id: self.id,
            topics,
            reason: reason.to_string(),
        });
    }

    fn on_frame(&self, text: &str) {
        *lock(&self.last_activity) = Instant::now();
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = self.id, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        match frame {
            ServerFrame::Response { nonce, error } => self.on_response(nonce, &error),
            ServerFrame::Message { data } => self.on_message(data),
            ServerFrame::Pong => {
                trace!(connection_id = self.id, "PONG");
                self.pong.notify_waiters();
            }
            ServerFrame::Reconnect => self.report_death("server requested reconnect"),
        }
    }

    fn on_response(&self, nonce: Option<String>, error: &str) {
        let Some(nonce) = nonce else {
            debug!(connection_id = self.id, "RESPONSE without nonce");
            return;
        };

        let (request, result) = {
            let mut topics = lock(&self.topics);
            let mut pending = lock(&self.pending);
            let Some(request) = pending.remove(&nonce) else {
                debug!(connection_id = self.id, nonce = %nonce, "RESPONSE for unknown nonce");
                return;
            };
            let result = match ResponseError::from_code(error) {
                None => {
                    topics.insert(request.topic.key().to_string(), request.topic.clone());
                    Ok(())
                }
                Some(e) => Err(e),
            };
            (request, result)
        };

        let _ = request.reply.send(result);
    }

    fn on_message(&self, data: MessageData) {
        let topic = lock(&self.topics).get(&data.topic).cloned();
        match topic {
            Some(topic) => {
                self.dispatcher.dispatch(&topic, &data.message);
            }
            None => debug!(
                connection_id = self.id,
                topic = %data.topic,
                "Dropping message for a topic not subscribed here"
            ),
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut inbound: mpsc::UnboundedReceiver<WsMessage>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = flipped(&mut stop) => return,
            frame = inbound.recv() => frame,
        };

        match frame {
            Some(WsMessage::Text(text)) => shared.on_frame(text.as_str()),
            Some(WsMessage::Close(_)) | None => {
                shared.report_death("transport closed");
                return;
            }
            Some(_) => trace!(connection_id = shared.id, "Ignoring non-text frame"),
        }
    }
}

async fn heartbeat_loop(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let period = shared.settings.ping_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = flipped(&mut stop) => return,
            _ = ticker.tick() => {}
        }

        // Armed before sending so a PONG left over from an earlier PING is not counted.
        let pong = shared.pong.notified();
        tokio::pin!(pong);
        pong.as_mut().enable();

        if !shared.send(&ClientFrame::Ping) {
            shared.report_death("ping could not be sent");
            return;
        }
        trace!(connection_id = shared.id, "PING");

        let ponged = tokio::select! {
            biased;
            _ = flipped(&mut stop) => return,
            _ = &mut pong => true,
            _ = tokio::time::sleep(shared.settings.pong_timeout) => false,
        };

        if ponged {
            missed = 0;
            continue;
        }

        missed += 1;
        warn!(connection_id = shared.id, missed, "No PONG within timeout");
        if missed >= shared.settings.max_missed_pongs {
            shared.report_death("heartbeat timeout");
            return;
        }
    }
}
