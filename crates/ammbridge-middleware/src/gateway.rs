//! WebSocket gateway onto the in-process [`EventBus`].
//!
//! [`BusGateway`] lets the rest of the simulation platform reach the bridge's
//! bus without linking against it:
//!
//! 1. **Outbound** – every event on the bus tap is pushed to each connected
//!    client as one JSON text frame (the serialised [`Event`]).
//!
//! 2. **Inbound** – every JSON text frame a client sends is decoded as a
//!    [`Record`] and published on the bus with source `gateway/<peer>`.
//!    Frames that do not decode are ignored.
//!
//! The gateway is agnostic about the *meaning* of the records it routes; it
//! only handles serialisation and transport.

use std::net::SocketAddr;
use std::sync::Arc;

use ammbridge_types::{BridgeError, Event, Record};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;

/// Bridge between WebSocket clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct BusGateway {
    bus: Arc<EventBus>,
}

impl BusGateway {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Start a WebSocket server on `addr`.
    ///
    /// The server runs until it encounters a fatal bind error.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bus`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Bus(format!("gateway bind error on {addr}: {e}")))?;
        info!(%addr, "bus gateway listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let gateway = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = gateway.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "gateway client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "gateway accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), BridgeError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| BridgeError::Bus(format!("ws handshake from {peer}: {e}")))?;
        debug!(%peer, "gateway client connected");

        let source = peer_source(peer);
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe();

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        // Do not echo a client's own records back to it.
                        Ok(event) if event.source == source => {}
                        Ok(event) => {
                            let json = serde_json::to_string(&event)
                                .map_err(|e| BridgeError::Serialization(e.to_string()))?;
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "gateway client lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_ws_message(&source, text.as_str());
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(%peer, "gateway client disconnected");
        Ok(())
    }

    /// Decode one client frame and publish it.  Returns `true` when a record
    /// was published.
    fn handle_incoming_ws_message(&self, source: &str, text: &str) -> bool {
        let record = match serde_json::from_str::<Record>(text) {
            Ok(record) => record,
            Err(e) => {
                debug!(source, error = %e, "ignoring undecodable gateway frame");
                return false;
            }
        };
        match self.bus.publish(Event::new(source, record)) {
            Ok(_) => true,
            Err(e) => {
                warn!(source, error = %e, "gateway publish failed");
                false
            }
        }
    }
}

fn peer_source(peer: SocketAddr) -> String {
    format!("gateway/{peer}")
}
