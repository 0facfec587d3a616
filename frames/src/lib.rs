//! Shared wire model for the signaling relay.
//!
//! This crate owns the representation used by both `server` and `peer`.
//! One WebSocket text message carries one [`RelayFrame`]:
//!
//! ```text
//! {"cmd": 2, "data": "<json-encoded SignalingEnvelope>"}
//! {"cmd": 4, "data": "{\"peer_id\":\"alice\"}"}
//! ```
//!
//! The relay only inspects `cmd` and, for signaling frames, the addressing
//! fields of the inner [`SignalingEnvelope`]. Session descriptions and
//! candidates travel as opaque strings inside the envelope's `data`.

use serde::{Deserialize, Serialize};

/// Opaque identity of one endpoint. Unique among connected peers.
pub type PeerId = String;

/// Wire value of [`Command::Signal`].
pub const CMD_SIGNAL: i64 = 2;

/// Wire value of [`Command::Register`].
pub const CMD_REGISTER: i64 = 4;

/// Error returned by the encode/decode helpers in this crate.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text was not a valid relay frame.
    #[error("malformed relay frame: {0}")]
    Frame(#[source] serde_json::Error),
    /// A register frame's payload was not `{"peer_id": "..."}`.
    #[error("malformed register payload: {0}")]
    Register(#[source] serde_json::Error),
    /// A signal frame's payload was not a signaling envelope.
    #[error("malformed signaling envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// An envelope's `data` was not a session description.
    #[error("malformed session description: {0}")]
    Description(#[source] serde_json::Error),
    /// An envelope's `data` was not a candidate.
    #[error("malformed ice candidate: {0}")]
    Candidate(#[source] serde_json::Error),
    /// A typed accessor was called on a frame with a different opcode.
    #[error("expected {expected:?} frame, got {found:?}")]
    UnexpectedCommand { expected: Command, found: Command },
    /// A value could not be serialized.
    #[error("failed to encode: {0}")]
    Encode(#[source] serde_json::Error),
}

// =============================================================================
// RELAY FRAME
// =============================================================================

/// Relay-level opcode.
///
/// Reserved opcodes survive decoding as [`Command::Unknown`] so the relay can
/// log them without dropping the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Command {
    /// Carries a JSON-encoded [`SignalingEnvelope`].
    Signal,
    /// Carries a JSON-encoded [`RegisterPayload`].
    Register,
    /// Any other opcode. Logged, never parsed.
    Unknown(i64),
}

impl Command {
    /// Wire integer for this command.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Signal => CMD_SIGNAL,
            Self::Register => CMD_REGISTER,
            Self::Unknown(cmd) => cmd,
        }
    }
}

impl From<i64> for Command {
    fn from(value: i64) -> Self {
        match value {
            CMD_SIGNAL => Self::Signal,
            CMD_REGISTER => Self::Register,
            other => Self::Unknown(other),
        }
    }
}

impl From<Command> for i64 {
    fn from(value: Command) -> Self {
        value.as_i64()
    }
}

/// One message on the relay wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub cmd: Command,
    #[serde(default)]
    pub data: String,
}

/// Payload of a register frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub peer_id: PeerId,
}

impl RelayFrame {
    /// Build a frame with an arbitrary command and raw payload.
    pub fn new(cmd: Command, data: impl Into<String>) -> Self {
        Self { cmd, data: data.into() }
    }

    /// Build a register frame announcing `peer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the payload cannot be serialized.
    pub fn register(peer_id: &str) -> Result<Self, CodecError> {
        let payload = RegisterPayload { peer_id: peer_id.to_owned() };
        let data = serde_json::to_string(&payload).map_err(CodecError::Encode)?;
        Ok(Self::new(Command::Register, data))
    }

    /// Build a signal frame carrying `envelope`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the envelope cannot be serialized.
    pub fn signal(envelope: &SignalingEnvelope) -> Result<Self, CodecError> {
        let data = serde_json::to_string(envelope).map_err(CodecError::Encode)?;
        Ok(Self::new(Command::Signal, data))
    }

    /// Decode one frame from a WebSocket text message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Frame`] for malformed JSON or a missing `cmd`.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        serde_json::from_str(text).map_err(CodecError::Frame)
    }

    /// Encode this frame as a WebSocket text message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }

    /// Parse the payload of a register frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedCommand`] for non-register frames and
    /// [`CodecError::Register`] for a malformed payload.
    pub fn register_payload(&self) -> Result<RegisterPayload, CodecError> {
        self.expect(Command::Register)?;
        serde_json::from_str(&self.data).map_err(CodecError::Register)
    }

    /// Parse the payload of a signal frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedCommand`] for non-signal frames and
    /// [`CodecError::Envelope`] for a malformed payload.
    pub fn envelope(&self) -> Result<SignalingEnvelope, CodecError> {
        self.expect(Command::Signal)?;
        serde_json::from_str(&self.data).map_err(CodecError::Envelope)
    }

    fn expect(&self, expected: Command) -> Result<(), CodecError> {
        if self.cmd == expected {
            Ok(())
        } else {
            Err(CodecError::UnexpectedCommand { expected, found: self.cmd })
        }
    }
}

// =============================================================================
// SIGNALING ENVELOPE
// =============================================================================

/// Kind of signaling event carried by an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventName {
    Offer,
    Answer,
    #[serde(rename = "icecandidate")]
    IceCandidate,
    /// Unrecognized event name. Still routable by the relay.
    #[serde(other)]
    Other,
}

/// Application-level signaling message, addressed peer to peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    pub from_peer_id: PeerId,
    pub to_peer_id: PeerId,
    pub event_name: EventName,
    pub data: String,
}

impl SignalingEnvelope {
    pub fn new(
        from_peer_id: impl Into<PeerId>,
        to_peer_id: impl Into<PeerId>,
        event_name: EventName,
        data: impl Into<String>,
    ) -> Self {
        Self {
            from_peer_id: from_peer_id.into(),
            to_peer_id: to_peer_id.into(),
            event_name,
            data: data.into(),
        }
    }

    /// Envelope carrying a session description. The event name follows the
    /// description type: answers and provisional answers travel as `answer`,
    /// everything else as `offer`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the description cannot be serialized.
    pub fn description(from: &str, to: &str, description: &SessionDescription) -> Result<Self, CodecError> {
        let event_name = match description.kind {
            SdpType::Answer | SdpType::Pranswer => EventName::Answer,
            SdpType::Offer | SdpType::Rollback => EventName::Offer,
        };
        let data = serde_json::to_string(description).map_err(CodecError::Encode)?;
        Ok(Self::new(from, to, event_name, data))
    }

    /// Envelope carrying one trickled candidate.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the candidate cannot be serialized.
    pub fn candidate(from: &str, to: &str, candidate: &IceCandidate) -> Result<Self, CodecError> {
        let data = serde_json::to_string(candidate).map_err(CodecError::Encode)?;
        Ok(Self::new(from, to, EventName::IceCandidate, data))
    }

    /// Parse `data` as a session description.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Description`] for a malformed payload.
    pub fn session_description(&self) -> Result<SessionDescription, CodecError> {
        serde_json::from_str(&self.data).map_err(CodecError::Description)
    }

    /// Parse `data` as a trickled candidate.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Candidate`] for a malformed payload.
    pub fn ice_candidate(&self) -> Result<IceCandidate, CodecError> {
        serde_json::from_str(&self.data).map_err(CodecError::Candidate)
    }
}

// =============================================================================
// SESSION PAYLOADS
// =============================================================================

/// Session description type, as in the browser `RTCSdpType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// `{"type": "...", "sdp": "..."}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

/// Trickled candidate in the browser `RTCIceCandidateInit` JSON shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
