//! Two peers negotiating through a live relay, with scripted transport sessions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use frames::{IceCandidate, SdpType, SessionDescription};
use peer::{
    ConnectionState, Event, EventSender, NegotiationSession, NegotiationState, Orchestrator, RelayClient, SessionError,
    TransportSession, event_channel,
};
use server::{AppState, ServerConfig};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Default)]
struct ScriptedTransport {
    remote: Mutex<Vec<SessionDescription>>,
    local: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
}

#[async_trait::async_trait]
impl TransportSession for ScriptedTransport {
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        self.remote.lock().unwrap().push(description);
        Ok(())
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        self.local.lock().unwrap().push(description);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

struct Peer {
    transport: Arc<ScriptedTransport>,
    events: EventSender,
    relay: RelayClient,
    task: JoinHandle<NegotiationSession>,
}

async fn start_relay() -> (String, AppState, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let state = AppState::new(&ServerConfig::default());
    let (stop, stopped) = oneshot::channel::<()>();
    let served = state.clone();
    tokio::spawn(async move {
        let _ = server::serve(listener, served, async {
            let _ = stopped.await;
        })
        .await;
    });
    (addr, state, stop)
}

async fn start_peer(addr: &str, id: &str, state: &AppState) -> Peer {
    let (events, inbox) = event_channel();
    let relay_events = events.clone();
    let relay = RelayClient::connect(addr, id, move |frame| {
        let _ = relay_events.send(Event::Relay(frame));
    })
    .await
    .expect("connect");

    wait_registered(state, id, true).await;

    let transport = Arc::new(ScriptedTransport::default());
    let orchestrator = Orchestrator::new(id, transport.clone(), Arc::new(relay.clone()));
    let task = tokio::spawn(orchestrator.run(inbox));
    Peer { transport, events, relay, task }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(3), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_registered(state: &AppState, id: &str, present: bool) {
    timeout(Duration::from_secs(3), async {
        while state.registry.lookup(id).await.is_some() != present {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry did not reach expected state");
}

fn host_candidate(port: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:1 1 udp 2130706431 192.0.2.1 {port} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[tokio::test]
async fn peers_negotiate_through_relay() {
    let (addr, state, stop) = start_relay().await;
    let alice = start_peer(&addr, "alice", &state).await;
    let bob = start_peer(&addr, "bob", &state).await;

    alice.events.send(Event::Connect("bob".into())).unwrap();

    // bob applies the offer and answers; alice applies the answer.
    eventually(|| bob.transport.remote.lock().unwrap().len() == 1).await;
    eventually(|| alice.transport.remote.lock().unwrap().len() == 1).await;
    assert_eq!(bob.transport.remote.lock().unwrap()[0].kind, SdpType::Offer);
    assert_eq!(bob.transport.local.lock().unwrap()[0].kind, SdpType::Answer);
    assert_eq!(alice.transport.remote.lock().unwrap()[0], SessionDescription::answer("v=0 answer"));

    // Trickled candidates cross in both directions.
    alice.events.send(Event::LocalCandidate(host_candidate(5000))).unwrap();
    bob.events.send(Event::LocalCandidate(host_candidate(6000))).unwrap();
    eventually(|| bob.transport.candidates.lock().unwrap().as_slice() == [host_candidate(5000)]).await;
    eventually(|| alice.transport.candidates.lock().unwrap().as_slice() == [host_candidate(6000)]).await;

    for peer in [&alice, &bob] {
        peer.events.send(Event::ConnectionState(ConnectionState::Connected)).unwrap();
        peer.events.send(Event::Shutdown).unwrap();
    }
    let alice_session = timeout(Duration::from_secs(2), alice.task).await.expect("alice stops").expect("join");
    let bob_session = timeout(Duration::from_secs(2), bob.task).await.expect("bob stops").expect("join");

    assert_eq!(alice_session.remote.as_deref(), Some("bob"));
    assert_eq!(bob_session.remote.as_deref(), Some("alice"));
    assert_eq!(alice_session.state, NegotiationState::Closed);
    assert_eq!(bob_session.state, NegotiationState::Closed);

    alice.relay.close();
    bob.relay.close();
    let _ = stop.send(());
}

#[tokio::test]
async fn offer_to_unregistered_peer_goes_nowhere() {
    let (addr, state, stop) = start_relay().await;
    let alice = start_peer(&addr, "alice", &state).await;

    alice.events.send(Event::Connect("nobody".into())).unwrap();
    eventually(|| alice.transport.local.lock().unwrap().len() == 1).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(alice.transport.remote.lock().unwrap().is_empty());
    assert!(!alice.relay.is_closed(), "relay keeps the sender connected");

    alice.relay.close();
    let _ = stop.send(());
}

#[tokio::test]
async fn disconnected_peer_is_unregistered() {
    let (addr, state, stop) = start_relay().await;
    let bob = start_peer(&addr, "bob", &state).await;

    bob.relay.close();
    wait_registered(&state, "bob", false).await;

    let _ = stop.send(());
}
