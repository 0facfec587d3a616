use std::sync::Arc;

use clap::Parser;
use peer::rtc::{DEFAULT_STUN_SERVER, RtcConfig, RtcSession};
use peer::{Event, Orchestrator, RelayClient, RelayError, SessionError, event_channel};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum PeerError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("transport session setup failed: {0}")]
    Session(#[from] SessionError),
}

#[derive(Parser, Debug)]
#[command(name = "peer", about = "Signaling peer: registers with the relay and negotiates a WebRTC session")]
struct Cli {
    /// Identity registered with the relay.
    #[arg(long, env = "PEER_ID")]
    peer_id: String,

    #[arg(long, env = "RELAY_HOST", default_value = "localhost")]
    relay_host: String,

    #[arg(long, env = "SIGNALING_PORT", default_value_t = 8081)]
    signaling_port: u16,

    /// Drop host candidates by excluding every local interface from gathering.
    #[arg(long, env = "FILTER_HOST_CAND", action = clap::ArgAction::Set)]
    filter_host_candidates: bool,

    #[arg(long = "stun-server", default_value = DEFAULT_STUN_SERVER)]
    stun_servers: Vec<String>,

    /// Act as the offering side toward this peer.
    #[arg(long)]
    offer_to: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), PeerError> {
    tracing_subscriber::fmt::init();

    if let Err(e) = dotenvy::dotenv() {
        info!(error = %e, ".env not loaded, using process environment");
    }
    let cli = Cli::parse();

    let (events, inbox) = event_channel();
    let config = RtcConfig { stun_servers: cli.stun_servers, filter_host_candidates: cli.filter_host_candidates };
    let session = RtcSession::new(&config, events.clone()).await?;
    if cli.offer_to.is_some() {
        session.open_data_channel("data").await?;
    }

    let address = format!("{}:{}", cli.relay_host, cli.signaling_port);
    let relay_events = events.clone();
    let relay = RelayClient::connect(&address, cli.peer_id.clone(), move |frame| {
        let _ = relay_events.send(Event::Relay(frame));
    })
    .await?;
    info!(peer_id = %cli.peer_id, %address, "peer started");

    let orchestrator = Orchestrator::new(cli.peer_id, Arc::new(session), Arc::new(relay.clone()));
    if let Some(remote) = cli.offer_to {
        let _ = events.send(Event::Connect(remote));
    }

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown requested");
        let _ = events.send(Event::Shutdown);
    });

    let session = orchestrator.run(inbox).await;
    info!(state = ?session.state, remote = ?session.remote, "negotiation finished");
    relay.close();
    Ok(())
}
