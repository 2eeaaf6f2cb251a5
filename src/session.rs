//! Peer session lifecycle
//!
//! One session is one peer connection bound to one stream path, either
//! publishing into the hub or subscribing out of it. The state machine is
//! strict: `Negotiating → Connected → {Disconnected, Failed} → Closed`, with
//! `Closed` reachable from every live state. Invalid transitions are
//! rejected rather than absorbed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};

/// Bound on waiting for ICE gathering; exceeding it fails the negotiation
const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Direction of a session relative to the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Peer sends media into the hub
    Publisher,
    /// Peer receives media from the hub
    Subscriber,
}

impl SessionRole {
    pub fn name(self) -> &'static str {
        match self {
            SessionRole::Publisher => "publisher",
            SessionRole::Subscriber => "subscriber",
        }
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// SDP exchange in progress, not yet connected
    Negotiating,
    /// DTLS/ICE up, media flowing
    Connected,
    /// Connectivity lost; no recovery is attempted
    Disconnected,
    /// ICE or DTLS failure
    Failed,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether `self → next` is a legal transition
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Negotiating, Connected)
                | (Negotiating, Disconnected)
                | (Negotiating, Failed)
                | (Negotiating, Closed)
                | (Connected, Disconnected)
                | (Connected, Failed)
                | (Connected, Closed)
                | (Disconnected, Closed)
                | (Failed, Closed)
        )
    }

    /// Map a peer connection state to the session state it implies, if any
    pub fn from_peer_state(state: RTCPeerConnectionState) -> Option<SessionState> {
        match state {
            RTCPeerConnectionState::Connected => Some(SessionState::Connected),
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                Some(SessionState::Disconnected)
            }
            RTCPeerConnectionState::Failed => Some(SessionState::Failed),
            _ => None,
        }
    }

    /// True for states from which no further transition is expected
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Build the shared WebRTC API object from bridge configuration.
///
/// Default codecs and interceptors, plus NAT 1:1 host candidates and a fixed
/// UDP port range when configured. One API serves all sessions.
pub fn build_api(config: &BridgeConfig) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::PeerConnectionError(format!("codec registration failed: {e}")))?;

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .map_err(|e| Error::PeerConnectionError(format!("interceptor registration failed: {e}")))?;

    let mut setting_engine = SettingEngine::default();
    if !config.public_ips.is_empty() {
        setting_engine.set_nat_1to1_ips(config.public_ips.clone(), RTCIceCandidateType::Host);
    }
    if config.udp_port_max > 0 {
        let udp = EphemeralUDP::new(config.udp_port_min, config.udp_port_max)
            .map_err(|e| Error::InvalidConfig(format!("bad UDP port range: {e}")))?;
        setting_engine.set_udp_network(UDPNetwork::Ephemeral(udp));
    }

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .with_setting_engine(setting_engine)
        .build())
}

/// One peer connection bound to one stream path
pub struct Session {
    id: String,
    role: SessionRole,
    stream_path: String,
    pc: Arc<RTCPeerConnection>,
    state: Arc<RwLock<SessionState>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    closed: AtomicBool,
}

impl Session {
    /// Create a session with its peer connection in `Negotiating`.
    ///
    /// # Arguments
    ///
    /// * `api` - Shared WebRTC API from [`build_api`]
    /// * `role` - Publisher or subscriber
    /// * `stream_path` - Hub stream path this session is bound to
    /// * `config` - Bridge configuration (ICE servers)
    pub async fn new(
        api: &API,
        role: SessionRole,
        stream_path: &str,
        config: &BridgeConfig,
    ) -> Result<Arc<Self>> {
        let id = uuid::Uuid::new_v4().to_string();

        let ice_servers: Vec<RTCIceServer> = config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::PeerConnectionError(format!("creation failed: {e}")))?,
        );

        info!(session_id = %id, role = role.name(), stream_path, "session created");

        let session = Arc::new(Self {
            id,
            role,
            stream_path: stream_path.to_string(),
            pc,
            state: Arc::new(RwLock::new(SessionState::Negotiating)),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            closed: AtomicBool::new(false),
        });

        let path = session.stream_path.clone();
        session.pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                if let Ok(init) = c.to_json() {
                    debug!(stream_path = %path, candidate = %init.candidate, "ICE candidate gathered");
                }
            }
            Box::pin(async {})
        }));

        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Token cancelled when the session closes
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Apply a state transition, rejecting anything not in the table.
    /// Re-entering the current state is a no-op.
    pub async fn transition(&self, next: SessionState) -> Result<()> {
        let mut state = self.state.write().await;
        if *state == next {
            return Ok(());
        }
        if !state.can_transition(next) {
            return Err(Error::SessionError(format!(
                "invalid transition {:?} -> {next:?}",
                *state
            )));
        }
        debug!(
            session_id = %self.id,
            stream_path = %self.stream_path,
            "session state {:?} -> {next:?}",
            *state
        );
        *state = next;
        Ok(())
    }

    /// Track a media/recovery task so close can join it
    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(fut);
    }

    /// Add recvonly-capable audio and video transceivers ahead of the answer
    /// so the peer can send either kind without renegotiation.
    pub async fn add_recv_transceivers(&self) -> Result<()> {
        self.pc
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .map_err(|e| Error::MediaTrackError(format!("video transceiver failed: {e}")))?;
        self.pc
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .map_err(|e| Error::MediaTrackError(format!("audio transceiver failed: {e}")))?;
        Ok(())
    }

    /// Install the remote offer
    pub async fn set_remote_offer(&self, offer: RTCSessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("remote offer rejected: {e}")))
    }

    /// Create the local answer, returning it only once ICE gathering has
    /// completed so the SDP carries the full candidate set. An answer with a
    /// partial candidate set is never returned; if gathering does not finish
    /// within the bound the negotiation fails.
    pub async fn create_answer(&self) -> Result<RTCSessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("answer creation failed: {e}")))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("local description rejected: {e}")))?;
        tokio::time::timeout(GATHER_TIMEOUT, gather_complete.recv())
            .await
            .map_err(|_| Error::SdpError("ICE gathering did not complete".to_string()))?;

        self.pc
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("no local description after gathering".to_string()))
    }

    /// Close the session: cancel adapter tasks, close the peer connection,
    /// then join every tracked task. Safe to call from multiple paths; only
    /// the first call does work.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut state = self.state.write().await;
            if !state.is_terminal() {
                debug!(session_id = %self.id, "session state {:?} -> Closed", *state);
                *state = SessionState::Closed;
            }
        }

        self.cancel.cancel();
        self.tasks.close();

        self.pc
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("close failed: {e}")))?;

        self.tasks.wait().await;
        info!(session_id = %self.id, stream_path = %self.stream_path, "session closed");
        Ok(())
    }
}
