//! WebSocket handler — peer registration and signaling relay.
//!
//! DESIGN
//! ======
//! On upgrade, each connection gets a connection ID and an outbound queue,
//! and the socket is split in two:
//! - Reader (the connection's task): decode + dispatch by command
//! - Writer (spawned): drain the outbound queue into the socket
//!
//! The writer is the only writer of its socket. Other connections reach it
//! through its queue in the registry, which serializes concurrent forwards
//! to the same destination. A forward waits while the destination queue is
//! full, so a slow peer backpressures its senders' readers. Writers never
//! wait on readers, so two peers forwarding to each other cannot deadlock.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → connection is unbound
//! 2. `REGISTER` (or the first `SIGNAL`) binds it to a peer ID, first write wins
//! 3. `SIGNAL` frames are forwarded verbatim to the addressed peer, or dropped
//! 4. Read error / close → unregister exactly once

use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{Command, PeerId, RelayFrame};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::Outbox;
use crate::state::AppState;

// =============================================================================
// CONNECTION
// =============================================================================

/// Server-side view of one live relay connection.
struct Connection {
    id: Uuid,
    /// Bound identity. `None` until a register or signal frame binds it.
    peer_id: Option<PeerId>,
    /// This connection's own queue, handed to the registry on bind.
    outbox: Outbox,
}

impl Connection {
    fn new(outbox: Outbox) -> Self {
        Self { id: Uuid::new_v4(), peer_id: None, outbox }
    }

    fn peer_label(&self) -> &str {
        self.peer_id.as_deref().unwrap_or("-")
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(socket: WebSocket, state: AppState) {
    let (outbox, inbox) = mpsc::channel::<Utf8Bytes>(state.queue_capacity);
    let mut conn = Connection::new(outbox);

    info!(conn_id = %conn.id, "ws: connection opened");

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(conn.id, sink, inbox));

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = &mut writer => break,
        };
        let Some(msg) = msg else { break };
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!(conn_id = %conn.id, peer_id = conn.peer_label(), error = %e, "ws: read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => process_inbound_text(&state, &mut conn, text).await,
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => process_inbound_text(&state, &mut conn, text.into()).await,
                Err(e) => warn!(conn_id = %conn.id, error = %e, "ws: non-utf8 binary frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    close_connection(&state, &mut conn).await;
    // Unregistered, so nothing new can be queued. Whatever is still queued is dropped.
    writer.abort();
}

/// Drain this connection's outbound queue into its socket. Ends on the
/// first write error.
async fn write_loop(conn_id: Uuid, mut sink: SplitSink<WebSocket, Message>, mut inbox: mpsc::Receiver<Utf8Bytes>) {
    while let Some(text) = inbox.recv().await {
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!(%conn_id, error = %e, "ws: write error");
            return;
        }
    }
}

/// Release this connection's identity. Safe to call more than once; only
/// the first call after a bind touches the registry.
async fn close_connection(state: &AppState, conn: &mut Connection) {
    if let Some(peer_id) = conn.peer_id.take() {
        if state.registry.unregister(&peer_id, conn.id).await {
            info!(conn_id = %conn.id, %peer_id, "ws: peer unregistered");
        }
    }
    info!(conn_id = %conn.id, "ws: connection closed");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and dispatch one inbound text frame.
///
/// Kept separate from the socket loop so tests can drive dispatch without
/// a live WebSocket.
async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: Utf8Bytes) {
    let frame = match RelayFrame::decode(text.as_str()) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(conn_id = %conn.id, peer_id = conn.peer_label(), error = %e, "ws: invalid inbound frame");
            return;
        }
    };

    debug!(conn_id = %conn.id, peer_id = conn.peer_label(), cmd = frame.cmd.as_i64(), "ws: recv frame");

    match frame.cmd {
        Command::Register => handle_register(state, conn, &frame).await,
        Command::Signal => handle_signal(state, conn, &frame, text).await,
        Command::Unknown(cmd) => {
            info!(conn_id = %conn.id, peer_id = conn.peer_label(), cmd, data = %frame.data, "ws: custom command");
        }
    }
}

async fn handle_register(state: &AppState, conn: &mut Connection, frame: &RelayFrame) {
    let payload = match frame.register_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(conn_id = %conn.id, error = %e, "ws: invalid register payload");
            return;
        }
    };
    bind(state, conn, &payload.peer_id).await;
}

async fn handle_signal(state: &AppState, conn: &mut Connection, frame: &RelayFrame, text: Utf8Bytes) {
    let envelope = match frame.envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(conn_id = %conn.id, peer_id = conn.peer_label(), error = %e, "ws: invalid signaling payload");
            return;
        }
    };

    // Implicit registration: an unbound sender is bound to its claimed identity.
    bind(state, conn, &envelope.from_peer_id).await;

    let Some(dest) = state.registry.lookup(&envelope.to_peer_id).await else {
        warn!(
            conn_id = %conn.id,
            from = %envelope.from_peer_id,
            to = %envelope.to_peer_id,
            "ws: destination peer not found, dropping"
        );
        return;
    };

    // Waits while the destination queue is full.
    if dest.send(text).await.is_ok() {
        debug!(
            from = %envelope.from_peer_id,
            to = %envelope.to_peer_id,
            event = ?envelope.event_name,
            "ws: forwarded signal"
        );
    } else {
        warn!(to = %envelope.to_peer_id, "ws: destination closing, dropping");
    }
}

/// Bind an unbound connection to `peer_id`. No-op once bound; rejected if
/// another live connection already owns the identity.
async fn bind(state: &AppState, conn: &mut Connection, peer_id: &str) {
    if let Some(current) = &conn.peer_id {
        if current != peer_id {
            debug!(conn_id = %conn.id, bound = %current, requested = %peer_id, "ws: already bound, ignoring");
        }
        return;
    }

    if state.registry.register(peer_id, conn.id, conn.outbox.clone()).await {
        conn.peer_id = Some(peer_id.to_owned());
        info!(conn_id = %conn.id, %peer_id, "ws: peer registered");
    } else {
        warn!(conn_id = %conn.id, %peer_id, "ws: peer id already registered, ignoring");
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
