//! WebRTC transport session backed by `webrtc-rs`.
//!
//! Callbacks registered on the peer connection do no work themselves: they
//! translate into [`Event`]s and push them onto the orchestrator's queue.

use std::sync::Arc;

use frames::{IceCandidate, SdpType, SessionDescription};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::orchestrator::{Event, EventSender};
use crate::session::{ConnectionState, SessionError, TransportSession};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug)]
pub struct RtcConfig {
    pub stun_servers: Vec<String>,
    /// Remove every local interface from gathering, leaving only
    /// server-reflexive candidates.
    pub filter_host_candidates: bool,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self { stun_servers: vec![DEFAULT_STUN_SERVER.to_owned()], filter_host_candidates: false }
    }
}

pub struct RtcSession {
    pc: Arc<RTCPeerConnection>,
}

impl RtcSession {
    /// Build a peer connection and wire its callbacks to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] if the media engine or peer
    /// connection cannot be created.
    pub async fn new(config: &RtcConfig, events: EventSender) -> Result<Self, SessionError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(|e| SessionError::rejected("media_engine", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| SessionError::rejected("interceptors", e))?;

        let mut settings = SettingEngine::default();
        let filter = config.filter_host_candidates;
        settings.set_interface_filter(Box::new(move |_name: &str| !filter));
        settings.set_network_types(vec![NetworkType::Udp4]);
        settings.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();

        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer { urls: vec![url.clone()], ..Default::default() })
            .collect();
        let pc = api
            .new_peer_connection(RTCConfiguration { ice_servers, ..Default::default() })
            .await
            .map_err(|e| SessionError::rejected("new_peer_connection", e))?;
        info!(filter_host_candidates = filter, stun = ?config.stun_servers, "rtc: peer connection created");

        let session = Self { pc: Arc::new(pc) };
        session.install_handlers(events);
        Ok(session)
    }

    fn install_handlers(&self, events: EventSender) {
        let candidates = events.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates = candidates.clone();
            Box::pin(async move {
                // None marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidates.send(Event::LocalCandidate(from_init(init)));
                    }
                    Err(e) => warn!(error = %e, "rtc: failed to serialize local candidate"),
                }
            })
        }));

        let states = events;
        self.pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let states = states.clone();
            Box::pin(async move {
                if let Some(state) = connection_state(state) {
                    let _ = states.send(Event::ConnectionState(state));
                }
            })
        }));

        self.pc.on_data_channel(Box::new(|dc: Arc<RTCDataChannel>| {
            Box::pin(async move {
                info!(label = dc.label(), "rtc: incoming data channel");
                log_data_channel(&dc);
            })
        }));
    }

    /// Open a data channel so an offer carries an application section.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] if the peer connection refuses it.
    pub async fn open_data_channel(&self, label: &str) -> Result<(), SessionError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| SessionError::rejected("create_data_channel", e))?;
        log_data_channel(&dc);
        Ok(())
    }
}

fn log_data_channel(dc: &Arc<RTCDataChannel>) {
    let label = dc.label().to_owned();
    let open_label = label.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            info!(label = %open_label, "rtc: data channel open");
        })
    }));
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let label = label.clone();
        Box::pin(async move {
            debug!(%label, message = %String::from_utf8_lossy(&msg.data), "rtc: data channel message");
        })
    }));
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, SessionError> {
    let result = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => return Err(SessionError::rejected("description", "rollback is not supported")),
    };
    result.map_err(|e| SessionError::rejected("description", e))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, SessionError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return Err(SessionError::rejected("description", "unspecified sdp type")),
    };
    Ok(SessionDescription { kind, sdp: description.sdp })
}

#[async_trait::async_trait]
impl TransportSession for RtcSession {
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        let description = to_rtc(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| SessionError::rejected("set_remote_description", e))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        let description = to_rtc(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| SessionError::rejected("set_local_description", e))
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let offer = self.pc.create_offer(None).await.map_err(|e| SessionError::rejected("create_offer", e))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        let answer = self.pc.create_answer(None).await.map_err(|e| SessionError::rejected("create_answer", e))?;
        from_rtc(answer)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| SessionError::rejected("add_ice_candidate", e))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.pc.close().await.map_err(|e| SessionError::rejected("close", e))
    }
}

#[cfg(test)]
#[path = "rtc_test.rs"]
mod tests;
