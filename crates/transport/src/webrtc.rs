//! WebRTC peer session
//!
//! Server-side half of the offer/answer exchange. One [`PeerSession`] is
//! created per accepted offer; it owns the peer connection, the outbound
//! Opus audio track, and the transcript/event data channel opened by the
//! client. Connection lifecycle changes are delivered as [`TransportEvent`]s
//! over a single ordered channel rather than scattered callbacks.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::API;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use voicebridge_config::constants::webrtc as webrtc_constants;
use voicebridge_core::TranscriptEvent;

use crate::TransportError;

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (stun: or turn:)
    pub urls: Vec<String>,
    /// Username (for TURN)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential (for TURN)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl Default for IceServer {
    fn default() -> Self {
        Self {
            urls: vec![webrtc_constants::DEFAULT_STUN_URL.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// WebRTC session configuration
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// ICE servers
    pub ice_servers: Vec<IceServer>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::default()],
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state
    New,
    /// ICE negotiation in progress
    Connecting,
    /// Media flowing
    Connected,
    /// Remote peer unreachable
    Disconnected,
    /// Negotiation failed
    Failed,
    /// Closed, terminal
    Closed,
}

/// Lifecycle events delivered on the session's event channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Peer connection reached the connected state
    Connected,
    /// The client's event data channel is open and writable
    ChannelOpen,
    /// Peer connection lost or closed
    Disconnected { reason: String },
    /// ICE negotiation failed
    Failed,
}

/// ICE candidate in the signaling wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid
    pub sdp_mid: Option<String>,
    /// SDP media line index
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Whether the candidate carries enough context to be applied.
    ///
    /// An empty candidate string is the end-of-candidates marker; a
    /// candidate with neither mid nor line index cannot be attached to a
    /// media section. Both are skipped, not treated as errors.
    pub fn is_applicable(&self) -> bool {
        !self.candidate.is_empty() && (self.sdp_mid.is_some() || self.sdp_mline_index.is_some())
    }
}

impl From<webrtc::ice_transport::ice_candidate::RTCIceCandidate> for IceCandidate {
    fn from(c: webrtc::ice_transport::ice_candidate::RTCIceCandidate) -> Self {
        // RTCIceCandidate does not carry SDP context; this session always
        // negotiates a single audio section, so mid/index are fixed.
        Self {
            candidate: c.to_string(),
            sdp_mid: Some("audio".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

type EventSlot = Arc<RwLock<Option<mpsc::Sender<TransportEvent>>>>;
type AudioSlot = Arc<RwLock<Option<mpsc::Sender<Bytes>>>>;

/// Server-side WebRTC session
pub struct PeerSession {
    pc: Arc<RTCPeerConnection>,
    state: Arc<RwLock<ConnectionState>>,
    audio_track: Arc<TrackLocalStaticSample>,
    event_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    event_tx: EventSlot,
    audio_tx: AudioSlot,
    gather_done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl PeerSession {
    /// Create a session and wire all peer connection handlers
    pub async fn new(config: WebRtcConfig) -> Result<Self, TransportError> {
        let api = media_api()?;
        let rtc_config = build_rtc_config(&config.ice_servers);

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?,
        );

        let state = Arc::new(RwLock::new(ConnectionState::New));
        let event_tx: EventSlot = Arc::new(RwLock::new(None));
        let audio_tx: AudioSlot = Arc::new(RwLock::new(None));
        let event_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>> = Arc::new(RwLock::new(None));

        // Outgoing audio: one Opus track for synthesized speech
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_string(),
            "voicebridge".to_string(),
        ));
        pc.add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::Media(format!("Failed to add audio track: {e}")))?;

        // Connection state changes feed the ordered event channel
        {
            let state = Arc::clone(&state);
            let event_tx = Arc::clone(&event_tx);
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let mapped = match s {
                    RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectionState::Failed,
                    RTCPeerConnectionState::Closed => ConnectionState::Closed,
                    _ => return Box::pin(async {}),
                };
                *state.write() = mapped;

                let event = match mapped {
                    ConnectionState::Connected => Some(TransportEvent::Connected),
                    ConnectionState::Failed => Some(TransportEvent::Failed),
                    ConnectionState::Disconnected | ConnectionState::Closed => {
                        Some(TransportEvent::Disconnected {
                            reason: format!("{mapped:?}"),
                        })
                    }
                    _ => None,
                };
                let tx = event_tx.read().clone();
                Box::pin(async move {
                    if let (Some(tx), Some(event)) = (tx, event) {
                        let _ = tx.send(event).await;
                    }
                })
            }));
        }

        // Incoming audio: forward encoded frames to whoever set the sink
        {
            let audio_tx = Arc::clone(&audio_tx);
            pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
                tracing::info!(kind = ?track.kind(), "Remote track received");
                let audio_tx = Arc::clone(&audio_tx);
                Box::pin(async move {
                    loop {
                        match track.read_rtp().await {
                            Ok((packet, _)) => {
                                if packet.payload.is_empty() {
                                    continue;
                                }
                                let tx = audio_tx.read().clone();
                                if let Some(tx) = tx {
                                    if tx.send(packet.payload).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Remote track ended");
                                break;
                            }
                        }
                    }
                })
            }));
        }

        // The client opens the transcript/event channel with its offer
        {
            let event_channel = Arc::clone(&event_channel);
            let event_tx = Arc::clone(&event_tx);
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                if dc.label() != webrtc_constants::EVENT_CHANNEL_LABEL {
                    tracing::debug!(label = %dc.label(), "Ignoring unexpected data channel");
                    return Box::pin(async {});
                }

                *event_channel.write() = Some(Arc::clone(&dc));

                let event_tx = Arc::clone(&event_tx);
                let dc_open = Arc::clone(&dc);
                Box::pin(async move {
                    dc_open.on_open(Box::new(move || {
                        let tx = event_tx.read().clone();
                        Box::pin(async move {
                            if let Some(tx) = tx {
                                let _ = tx.send(TransportEvent::ChannelOpen).await;
                            }
                        })
                    }));
                })
            }));
        }

        // One-shot fired when ICE gathering completes; consumed by accept_offer
        let (gather_done_tx, gather_done_rx) = oneshot::channel::<()>();
        let gather_done_tx = Arc::new(Mutex::new(Some(gather_done_tx)));
        pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
            if s == RTCIceGathererState::Complete {
                if let Some(tx) = gather_done_tx.lock().take() {
                    let _ = tx.send(());
                }
            }
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            state,
            audio_track,
            event_channel,
            event_tx,
            audio_tx,
            gather_done_rx: Mutex::new(Some(gather_done_rx)),
        })
    }

    /// Register the lifecycle event sink
    pub fn set_event_callback(&self, tx: mpsc::Sender<TransportEvent>) {
        *self.event_tx.write() = Some(tx);
    }

    /// Register the inbound audio frame sink
    pub fn set_audio_sink(&self, tx: mpsc::Sender<Bytes>) {
        *self.audio_tx.write() = Some(tx);
    }

    /// Apply the remote offer and produce the local answer SDP
    ///
    /// Waits for ICE gathering (bounded) so the answer carries the local
    /// candidates; on timeout the partial set is returned, since trickle
    /// candidates still arrive via `/candidate`.
    pub async fn accept_offer(&self, offer_sdp: &str) -> Result<String, TransportError> {
        *self.state.write() = ConnectionState::Connecting;

        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| TransportError::BadDescription(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::BadDescription(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Guard must drop before the await below
        let gather_done = self.gather_done_rx.lock().take();
        if let Some(rx) = gather_done {
            let timeout = Duration::from_secs(webrtc_constants::ICE_GATHER_TIMEOUT_SECS);
            match tokio::time::timeout(timeout, rx).await {
                Ok(_) => tracing::debug!("ICE gathering complete"),
                Err(_) => tracing::warn!(
                    timeout_secs = webrtc_constants::ICE_GATHER_TIMEOUT_SECS,
                    "ICE gathering timed out, answering with partial candidates"
                ),
            }
        }

        Ok(self
            .pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .unwrap_or(answer.sdp))
    }

    /// Apply one remote trickle-ICE candidate
    pub async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.pc.add_ice_candidate(init).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("Failed to add ICE candidate: {e}"))
        })?;

        tracing::debug!(candidate = %candidate.candidate, "Added remote ICE candidate");
        Ok(())
    }

    /// Send one transcript event over the data channel
    pub async fn send_event(&self, event: &TranscriptEvent) -> Result<(), TransportError> {
        let dc = self
            .event_channel
            .read()
            .clone()
            .ok_or(TransportError::ChannelNotOpen)?;

        let payload =
            serde_json::to_string(event).map_err(|e| TransportError::Internal(e.to_string()))?;
        dc.send_text(payload)
            .await
            .map_err(|e| TransportError::Media(format!("Data channel send failed: {e}")))?;
        Ok(())
    }

    /// Write one encoded audio frame to the outgoing track
    pub async fn write_audio(&self, data: Bytes, duration: Duration) -> Result<(), TransportError> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.audio_track
            .write_sample(&sample)
            .await
            .map_err(|e| TransportError::Media(format!("Failed to write sample: {e}")))
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Close the peer connection; terminal
    pub async fn close(&self) -> Result<(), TransportError> {
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Internal(e.to_string()))?;
        *self.state.write() = ConnectionState::Closed;
        Ok(())
    }
}

/// Opus capability shared by the outbound track and codec registration
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Build a WebRTC API instance with the Opus codec and ICE timeouts this
/// project uses on both sides of the call
pub fn media_api() -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_codec(
            webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters {
                capability: opus_capability(),
                payload_type: 111,
                stats_id: String::new(),
            },
            webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Audio,
        )
        .map_err(|e| TransportError::Internal(e.to_string()))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| TransportError::Internal(e.to_string()))?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_timeouts(
        Some(Duration::from_secs(
            webrtc_constants::ICE_DISCONNECTED_TIMEOUT_SECS,
        )),
        Some(Duration::from_secs(webrtc_constants::ICE_FAILED_TIMEOUT_SECS)),
        Some(Duration::from_secs(
            webrtc_constants::ICE_KEEPALIVE_INTERVAL_SECS,
        )),
    );

    Ok(webrtc::api::APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

fn build_rtc_config(ice_servers: &[IceServer]) -> RTCConfiguration {
    let ice_servers: Vec<RTCIceServer> = ice_servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webrtc_config_default() {
        let config = WebRtcConfig::default();
        assert!(!config.ice_servers.is_empty());
        assert_eq!(
            config.ice_servers[0].urls[0],
            webrtc_constants::DEFAULT_STUN_URL
        );
    }

    #[test]
    fn test_candidate_applicability() {
        let good = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.1 54321 typ host".to_string(),
            sdp_mid: Some("audio".to_string()),
            sdp_mline_index: Some(0),
        };
        assert!(good.is_applicable());

        // End-of-candidates marker
        let empty = IceCandidate {
            candidate: String::new(),
            sdp_mid: Some("audio".to_string()),
            sdp_mline_index: Some(0),
        };
        assert!(!empty.is_applicable());

        // No media section context
        let orphan = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.1 54321 typ host".to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        assert!(!orphan.is_applicable());
    }

    #[test]
    fn test_candidate_serialization() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.1 54321 typ host".to_string(),
            sdp_mid: Some("audio".to_string()),
            sdp_mline_index: Some(0),
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdp_mid"], "audio");
        assert_eq!(json["sdp_mline_index"], 0);

        let parsed: IceCandidate = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.candidate, candidate.candidate);
    }

    #[tokio::test]
    async fn test_peer_session_new() {
        let session = PeerSession::new(WebRtcConfig::default()).await;
        assert!(session.is_ok());
        let session = session.unwrap();
        assert_eq!(session.connection_state(), ConnectionState::New);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_send_event_before_channel_open() {
        let session = PeerSession::new(WebRtcConfig::default()).await.unwrap();
        let result = session
            .send_event(&voicebridge_core::TranscriptEvent::text("hi", true))
            .await;
        assert!(matches!(result, Err(TransportError::ChannelNotOpen)));
    }

    #[tokio::test]
    async fn test_malformed_offer_is_bad_description() {
        let session = PeerSession::new(WebRtcConfig::default()).await.unwrap();
        let result = session.accept_offer("not an sdp").await;
        assert!(matches!(result, Err(TransportError::BadDescription(_))));
    }
}
