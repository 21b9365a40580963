// ===============================
// src/connection.rs
// ===============================
//
// Single duplex channel to the game server (WebSocket, JSON text frames).
// - connect() opens the socket and spawns one reader and one writer task.
// - Outbound frames go through an unbounded FIFO, so call order == wire order.
// - On close/error the status flips to Closed and recv() yields None.
//   No retry here; reconnecting is the application shell's job.
//

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::{Identity, Outbound, RoomCode};
use crate::metrics::{CONN_STATUS, DISCONNECTS, FRAMES_OUT};

const INBOUND_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnStatus {
    Connecting,
    Open,
    Closed,
}

impl ConnStatus {
    fn gauge(&self) -> i64 {
        match self {
            ConnStatus::Connecting => 1,
            ConnStatus::Open => 2,
            ConnStatus::Closed => 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("bad endpoint url: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Who we are and which room we join; stamped on every outbound frame.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub room: RoomCode,
    pub identity: Identity,
}

fn publish(status_tx: &watch::Sender<ConnStatus>, s: ConnStatus) {
    CONN_STATUS.set(s.gauge());
    status_tx.send_replace(s);
}

pub struct ConnectionHandle {
    creds: Credentials,
    out_tx: mpsc::UnboundedSender<String>,
    inbound: mpsc::Receiver<String>,
    status_tx: Arc<watch::Sender<ConnStatus>>,
    status_rx: watch::Receiver<ConnStatus>,
    reader: Option<JoinHandle<()>>,
}

/// Server side of an in-memory connection.
pub struct Peer {
    pub inbound_tx: mpsc::Sender<String>,
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    pub status_tx: Arc<watch::Sender<ConnStatus>>,
}

impl Peer {
    /// Push one raw frame to the client.
    pub async fn push(&self, frame: impl Into<String>) {
        let _ = self.inbound_tx.send(frame.into()).await;
    }

    /// Simulate the server hanging up.
    pub fn hang_up(self) {
        publish(&self.status_tx, ConnStatus::Closed);
    }
}

pub async fn connect(
    endpoint: &str,
    creds: Credentials,
) -> Result<ConnectionHandle, ConnectionError> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut()
        .append_pair("roomId", creds.room.as_str())
        .append_pair("nickname", &creds.identity.nickname);

    let (status_tx, status_rx) = watch::channel(ConnStatus::Connecting);
    let status_tx = Arc::new(status_tx);
    publish(&status_tx, ConnStatus::Connecting);

    info!(%url, "connecting game server");
    let (ws, _resp) = match connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            publish(&status_tx, ConnStatus::Closed);
            return Err(e.into());
        }
    };
    let (mut sink, mut stream) = ws.split();
    publish(&status_tx, ConnStatus::Open);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

    // ends on its own once the queue is drained and the sender is gone
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame)).await {
                error!(?e, "ws write error");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_status = status_tx.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(txt)) => {
                    if in_tx.send(txt).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(?frame, "server closed connection");
                    break;
                }
                Ok(_) => {
                    // ping/pong/binary
                }
                Err(e) => {
                    error!(?e, "ws read error");
                    break;
                }
            }
        }
        DISCONNECTS.inc();
        publish(&reader_status, ConnStatus::Closed);
    });

    info!(room = %creds.room, nickname = %creds.identity.nickname, "connected");

    Ok(ConnectionHandle {
        creds,
        out_tx,
        inbound: in_rx,
        status_tx,
        status_rx,
        reader: Some(reader),
    })
}

impl ConnectionHandle {
    /// Channel-backed connection with no socket behind it.
    pub fn in_memory(creds: Credentials) -> (ConnectionHandle, Peer) {
        let (status_tx, status_rx) = watch::channel(ConnStatus::Open);
        let status_tx = Arc::new(status_tx);
        let (out_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let handle = ConnectionHandle {
            creds,
            out_tx,
            inbound,
            status_tx: status_tx.clone(),
            status_rx,
            reader: None,
        };
        (handle, Peer { inbound_tx, outbound_rx, status_tx })
    }

    pub fn credentials(&self) -> &Credentials { &self.creds }

    pub fn status(&self) -> ConnStatus { *self.status_rx.borrow() }

    /// Encode and queue one frame. Returns the wire text.
    pub fn send(&self, msg: &Outbound) -> Result<String, SendError> {
        if self.status() != ConnStatus::Open {
            return Err(SendError::NotConnected);
        }
        let frame = msg.to_frame(&self.creds.room, &self.creds.identity.nickname)?;
        self.out_tx.send(frame.clone()).map_err(|_| SendError::NotConnected)?;
        FRAMES_OUT.with_label_values(&[msg.tag()]).inc();
        debug!(tag = msg.tag(), "frame queued");
        Ok(frame)
    }

    /// Next raw inbound frame; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<String> {
        let frame = self.inbound.recv().await;
        if frame.is_none() && self.status() != ConnStatus::Closed {
            publish(&self.status_tx, ConnStatus::Closed);
        }
        frame
    }

    /// Resolves when the status changes to Closed.
    pub async fn closed(&mut self) {
        loop {
            if *self.status_rx.borrow_and_update() == ConnStatus::Closed {
                return;
            }
            if self.status_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop reading and let the writer flush what is already queued.
    pub fn close(&mut self) {
        let (dead, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.out_tx, dead));
        if let Some(t) = self.reader.take() {
            t.abort();
        }
        if self.status() != ConnStatus::Closed {
            warn!("closing connection");
            publish(&self.status_tx, ConnStatus::Closed);
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(t) = self.reader.take() {
            t.abort();
        }
    }
}
