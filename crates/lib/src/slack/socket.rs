//! Socket Mode connection loop: open a WebSocket URL, ack every envelope, forward normalized
//! events to the daemon, reconnect with exponential backoff until shutdown.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::api::SlackClient;
use super::events::{ack_frame, parse_frame, SocketFrame};
use crate::error::GatewayConnectionError;
use crate::message::InboundEvent;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential reconnect delay: doubles per failure, capped, reset after a `hello`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max,
        }
    }

    /// Delay to wait now; the following call returns double (up to the cap).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How one WebSocket connection ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum ConnectionEnd {
    Shutdown,
    Reconnect(String),
    InboundClosed,
}

pub struct SocketModeGateway {
    client: SlackClient,
    bot_user_id: Option<String>,
}

impl SocketModeGateway {
    pub fn new(client: SlackClient, bot_user_id: Option<String>) -> Self {
        Self {
            client,
            bot_user_id,
        }
    }

    /// Spawn the connection loop. The task ends when `shutdown` flips to true or the inbound
    /// receiver is dropped.
    pub fn start(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        log::info!("slack socket mode: starting connection loop");
        tokio::spawn(async move {
            run_socket_loop(self, inbound_tx, shutdown).await;
        })
    }

    async fn connect_and_run(
        &self,
        inbound_tx: &mpsc::Sender<InboundEvent>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<ConnectionEnd, GatewayConnectionError> {
        let url = self.client.open_socket_url().await?;
        let (ws, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws.split();
        log::debug!("slack socket mode: websocket connected");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Shutdown);
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let (envelope_id, frame) =
                            match parse_frame(&text, self.bot_user_id.as_deref()) {
                                Ok(parsed) => parsed,
                                Err(e) => {
                                    log::warn!("slack socket mode: malformed frame: {}", e);
                                    continue;
                                }
                            };
                        if let Some(id) = envelope_id {
                            write.send(Message::Text(ack_frame(&id))).await?;
                        }
                        match frame {
                            SocketFrame::Hello => {
                                log::info!("slack socket mode: connection established");
                                backoff.reset();
                            }
                            SocketFrame::Disconnect(reason) if reason == "link_disabled" => {
                                return Err(GatewayConnectionError::Disconnect(reason));
                            }
                            SocketFrame::Disconnect(reason) => {
                                return Ok(ConnectionEnd::Reconnect(reason));
                            }
                            SocketFrame::Event(event) => {
                                log::debug!(
                                    "slack event {:?} in {} from {}",
                                    event.kind,
                                    event.channel_id,
                                    event.sender_id
                                );
                                if inbound_tx.send(event).await.is_err() {
                                    return Ok(ConnectionEnd::InboundClosed);
                                }
                            }
                            SocketFrame::Ignored => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(GatewayConnectionError::Disconnect("closed by server".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(ConnectionEnd::Reconnect("stream ended".to_string())),
                },
            }
        }
    }
}

async fn run_socket_loop(
    gateway: Arc<SocketModeGateway>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::default();
    while !*shutdown.borrow() {
        match gateway
            .connect_and_run(&inbound_tx, &mut shutdown, &mut backoff)
            .await
        {
            Ok(ConnectionEnd::Shutdown) => break,
            Ok(ConnectionEnd::InboundClosed) => {
                log::debug!("slack socket mode: inbound channel closed, stopping loop");
                break;
            }
            Ok(ConnectionEnd::Reconnect(reason)) => {
                log::info!("slack socket mode: reconnecting ({})", reason);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                log::warn!("slack socket mode: {} (retrying in {:?})", e, delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    log::info!("slack socket mode: connection loop stopped");
}
