//! In-memory stand-in for the PubSub endpoint.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tungstenite::protocol::Message as WsMessage;

use crate::transport::connection::{Connector, Link};
use crate::transport::message::ClientFrame;
use crate::utils::error::ConnectError;

/// Server end of one mock link.
#[derive(Clone)]
pub(crate) struct MockServer {
    to_client: Arc<Mutex<Option<mpsc::UnboundedSender<WsMessage>>>>,
    frames: Arc<Mutex<Vec<ClientFrame>>>,
    seen: Arc<Notify>,
}

impl MockServer {
    pub fn send(&self, frame: Value) -> bool {
        self.send_text(&frame.to_string())
    }

    pub fn send_text(&self, text: &str) -> bool {
        match self.to_client.lock().unwrap().as_ref() {
            Some(tx) => tx.send(WsMessage::text(text.to_string())).is_ok(),
            None => false,
        }
    }

    pub fn send_message(&self, topic: &str, message: Value) -> bool {
        self.send(json!({
            "type": "MESSAGE",
            "data": { "topic": topic, "message": message.to_string() }
        }))
    }

    /// Drops the server's sending side; the client sees the transport end.
    pub fn kill(&self) {
        self.to_client.lock().unwrap().take();
    }

    pub fn frames(&self) -> Vec<ClientFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// `(nonce, topic key)` of every LISTEN received so far.
    pub fn listens(&self) -> Vec<(String, String)> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                ClientFrame::Listen { nonce, data } => Some((nonce, data.topics[0].clone())),
                _ => None,
            })
            .collect()
    }

    pub fn pings(&self) -> usize {
        self.frames()
            .iter()
            .filter(|f| matches!(f, ClientFrame::Ping))
            .count()
    }

    pub async fn wait_for_listens(&self, count: usize) -> Vec<(String, String)> {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let notified = self.seen.notified();
                let listens = self.listens();
                if listens.len() >= count {
                    return listens;
                }
                notified.await;
            }
        })
        .await
        .expect("LISTEN frames did not arrive")
    }

    pub fn ack(&self, nonce: &str, error: &str) -> bool {
        self.send(json!({ "type": "RESPONSE", "nonce": nonce, "error": error }))
    }
}

/// Hands out in-memory links and keeps their server ends for inspection.
pub(crate) struct MockConnector {
    auto_ack: bool,
    answer_pings: bool,
    refusals: AtomicUsize,
    stalled: AtomicBool,
    servers: Mutex<Vec<MockServer>>,
}

impl MockConnector {
    /// Acknowledges every LISTEN and answers every PING.
    pub fn responsive() -> Arc<Self> {
        Arc::new(Self::new(true, true))
    }

    /// Records frames but never answers anything.
    pub fn silent() -> Arc<Self> {
        Arc::new(Self::new(false, false))
    }

    pub fn new(auto_ack: bool, answer_pings: bool) -> Self {
        Self {
            auto_ack,
            answer_pings,
            refusals: AtomicUsize::new(0),
            stalled: AtomicBool::new(false),
            servers: Mutex::new(Vec::new()),
        }
    }

    /// The next `count` connection attempts fail.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// Connection attempts from now on never complete.
    pub fn stall_connects(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn servers(&self) -> Vec<MockServer> {
        self.servers.lock().unwrap().clone()
    }

    pub fn server(&self, index: usize) -> MockServer {
        self.servers()[index].clone()
    }

    pub fn opened(&self) -> usize {
        self.servers.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link, ConnectError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ConnectError::Refused("mock refusal".to_string()));
        }

        let (to_client, receiver) = mpsc::unbounded_channel();
        let (sender, mut from_client) = mpsc::unbounded_channel::<WsMessage>();

        let server = MockServer {
            to_client: Arc::new(Mutex::new(Some(to_client))),
            frames: Arc::new(Mutex::new(Vec::new())),
            seen: Arc::new(Notify::new()),
        };
        self.servers.lock().unwrap().push(server.clone());

        let auto_ack = self.auto_ack;
        let answer_pings = self.answer_pings;
        tokio::spawn(async move {
            while let Some(msg) = from_client.recv().await {
                let WsMessage::Text(text) = msg else { continue };
                let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
                    continue;
                };
                server.frames.lock().unwrap().push(frame.clone());
                match frame {
                    ClientFrame::Listen { nonce, .. } | ClientFrame::Unlisten { nonce, .. }
                        if auto_ack =>
                    {
                        server.ack(&nonce, "");
                    }
                    ClientFrame::Ping if answer_pings => {
                        server.send(json!({ "type": "PONG" }));
                    }
                    _ => {}
                }
                server.seen.notify_waiters();
            }
        });

        Ok(Link { sender, receiver })
    }
}
