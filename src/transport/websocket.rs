//! WebSocket transport
//!
//! [`WebSocketConnector`] opens the PubSub endpoint with `tokio-tungstenite`
//! and turns the socket into a [`Link`]:
//! - a send loop forwards frames queued on the link to the socket and closes
//!   the socket once the link's sender is dropped
//! - a receive loop forwards socket frames to the link and ends the link when
//!   the socket closes or fails

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::transport::connection::{Connector, Link};
use crate::utils::error::ConnectError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, ConnectError> {
        let (ws_stream, _response) =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(self.url.as_str()))
                .await
                .map_err(|_| ConnectError::Timeout)??;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<WsMessage>();

        let url = self.url.clone();
        spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(url = %url, error = %e, "Failed to send frame");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!(url = %url, "Send loop closed");
        });

        let url = self.url.clone();
        spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = in_tx.closed() => break,
                    frame = ws_receiver.next() => frame,
                };
                match frame {
                    Some(Ok(msg)) => {
                        if in_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(url = %url, error = %e, "WebSocket read failed");
                        break;
                    }
                    None => break,
                }
            }
            debug!(url = %url, "Receive loop closed");
        });

        Ok(Link {
            sender: out_tx,
            receiver: in_rx,
        })
    }
}
