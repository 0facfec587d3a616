//! Signaling peer: relay client, negotiation orchestrator, and the
//! transport-session contract it drives.

pub mod orchestrator;
pub mod relay;
#[cfg(feature = "webrtc")]
pub mod rtc;
pub mod session;

pub use orchestrator::{Event, EventSender, NegotiationSession, NegotiationState, Orchestrator, event_channel};
pub use relay::{RelayClient, RelayError, RelaySink};
pub use session::{ConnectionState, SessionError, TransportSession};
