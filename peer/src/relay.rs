//! Relay client — one persistent WebSocket connection to the relay server.
//!
//! DESIGN
//! ======
//! `connect` dials `ws://<address>/ws`, queues a register frame for the
//! local peer ID, and spawns two loops over the split socket:
//! - read loop: decode one frame, hand it to `on_message`, repeat
//! - write loop: drain the bounded outbound queue in FIFO order
//!
//! `on_message` runs inline in the read loop, so the next frame is not read
//! until the handler returns. A slow handler stalls only this peer's stream.
//!
//! CLOSE
//! =====
//! A `watch` flag is the single close signal. Flipping it is idempotent,
//! both loops select on it, and `send` refuses to queue once it is set.
//! Frames still queued when the flag flips are discarded, never written. A
//! write blocked on a peer that stopped reading is abandoned, and the socket
//! is dropped once both loops have exited.

use std::sync::Arc;
use std::time::Duration;

use frames::{CodecError, PeerId, RelayFrame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

/// Capacity of the outbound frame queue. `send` waits when it is full.
pub const OUTBOUND_CAPACITY: usize = 16;

/// How long the write loop waits for the close handshake before dropping the socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("failed to build register frame: {0}")]
    Encode(#[from] CodecError),
}

/// Where the orchestrator sends outbound frames. Implemented by
/// [`RelayClient`]; tests substitute a recording sink.
#[async_trait::async_trait]
pub trait RelaySink: Send + Sync {
    async fn send(&self, frame: RelayFrame);
}

/// Cheap-to-clone handle to a live relay connection.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

struct Inner {
    peer_id: PeerId,
    outbound: mpsc::Sender<RelayFrame>,
    closed: watch::Sender<bool>,
}

/// `ws://<address>/ws`
#[must_use]
pub fn relay_url(address: &str) -> String {
    format!("ws://{address}/ws")
}

impl RelayClient {
    /// Connect to the relay at `address` (`host:port`), register `peer_id`,
    /// and start delivering inbound frames to `on_message`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connect`] if the WebSocket cannot be established.
    pub async fn connect<F>(address: &str, peer_id: impl Into<PeerId>, on_message: F) -> Result<Self, RelayError>
    where
        F: FnMut(RelayFrame) + Send + 'static,
    {
        let peer_id = peer_id.into();
        let register = RelayFrame::register(&peer_id)?;

        let url = relay_url(address);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RelayError::Connect(Box::new(e)))?;
        info!(%url, %peer_id, "relay: connected");

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (closed, _) = watch::channel(false);
        let client = Self { inner: Arc::new(Inner { peer_id, outbound, closed }) };

        // The queue is fresh, so the register frame always goes out first.
        if client.inner.outbound.try_send(register).is_err() {
            warn!(peer_id = %client.inner.peer_id, "relay: could not queue register frame");
        }

        let (sink, stream) = stream.split();
        tokio::spawn(write_loop(client.clone(), sink, outbound_rx));
        tokio::spawn(read_loop(client.clone(), stream, on_message));

        Ok(client)
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Queue a frame for the relay. Waits while the queue is full. On a
    /// closed client the frame is logged and discarded.
    pub async fn send(&self, frame: RelayFrame) {
        let cmd = frame.cmd.as_i64();
        let mut closed = self.inner.closed.subscribe();
        tokio::select! {
            biased;
            () = closed_signal(&mut closed) => {
                warn!(peer_id = %self.inner.peer_id, cmd, "relay: send on closed client");
            }
            result = self.inner.outbound.send(frame) => {
                if result.is_err() {
                    warn!(peer_id = %self.inner.peer_id, cmd, "relay: write loop gone, frame dropped");
                }
            }
        }
    }

    /// Stop both loops and close the socket. Only the first call has effect.
    pub fn close(&self) {
        let first = self.inner.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if first {
            info!(peer_id = %self.inner.peer_id, "relay: client closed");
        }
    }
}

#[async_trait::async_trait]
impl RelaySink for RelayClient {
    async fn send(&self, frame: RelayFrame) {
        RelayClient::send(self, frame).await;
    }
}

// =============================================================================
// LOOPS
// =============================================================================

/// Resolves once the close flag is set, or the client state is gone.
async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn write_loop(
    client: RelayClient,
    mut sink: SplitSink<RelayStream, Message>,
    mut outbound: mpsc::Receiver<RelayFrame>,
) {
    let mut closed = client.inner.closed.subscribe();
    loop {
        let frame = tokio::select! {
            biased;
            () = closed_signal(&mut closed) => break,
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(peer_id = %client.inner.peer_id, error = %e, "relay: failed to encode frame");
                continue;
            }
        };
        // A write stalled on a peer that is not reading must not outlive close.
        let result = tokio::select! {
            biased;
            () = closed_signal(&mut closed) => break,
            result = sink.send(Message::Text(text.into())) => result,
        };
        if let Err(e) = result {
            warn!(peer_id = %client.inner.peer_id, error = %e, "relay: write error");
            client.close();
            break;
        }
        debug!(peer_id = %client.inner.peer_id, cmd = frame.cmd.as_i64(), "relay: sent frame");
    }

    // Dropping the receiver discards anything still queued.
    drop(outbound);
    match timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(peer_id = %client.inner.peer_id, error = %e, "relay: close handshake failed"),
        Err(_) => debug!(peer_id = %client.inner.peer_id, "relay: close handshake timed out"),
    }
}

async fn read_loop<F>(client: RelayClient, mut stream: SplitStream<RelayStream>, mut on_message: F)
where
    F: FnMut(RelayFrame) + Send + 'static,
{
    let mut closed = client.inner.closed.subscribe();
    loop {
        let msg = tokio::select! {
            biased;
            () = closed_signal(&mut closed) => break,
            msg = stream.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(peer_id = %client.inner.peer_id, error = %e, "relay: non-utf8 binary frame");
                    client.close();
                    break;
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                info!(peer_id = %client.inner.peer_id, "relay: connection closed by server");
                client.close();
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(peer_id = %client.inner.peer_id, error = %e, "relay: read error");
                client.close();
                break;
            }
        };

        match RelayFrame::decode(&text) {
            Ok(frame) => on_message(frame),
            Err(e) => {
                warn!(peer_id = %client.inner.peer_id, error = %e, "relay: undecodable frame");
                client.close();
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
