//! Voice client
//!
//! Native counterpart to the signaling server: dials the offer endpoint,
//! streams microphone audio up, and folds transcript events from the data
//! channel into a [`TranscriptView`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use voicebridge_config::constants::{channels, webrtc as webrtc_constants};
use voicebridge_core::{TranscriptEvent, TranscriptView};
use voicebridge_transport::{media_api, opus_capability, IceCandidate, IceServer};

use crate::relay::{CandidateRelay, CandidateSink};
use crate::signaling::SignalingApi;
use crate::ClientError;

/// Events surfaced to the application
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    Failed,
    /// One transcript channel message, already folded into the view
    Transcript(TranscriptEvent),
}

/// Microphone (or any audio) source
///
/// `start` opens the device and begins producing encoded frames on the
/// sender, returning once capture is running; implementations spawn their
/// own producer task and push frames until the sender is dropped. A denied
/// or missing device maps to [`ClientError::MediaAccess`] and fails the
/// dial before any offer is posted.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn start(&self, frames: mpsc::Sender<Bytes>) -> Result<(), ClientError>;

    /// Pacing for outgoing samples
    fn frame_duration(&self) -> Duration {
        Duration::from_millis(20)
    }
}

/// One live call
pub struct VoiceClient {
    pc: Arc<RTCPeerConnection>,
    connection_id: String,
    relay: Arc<CandidateRelay>,
    transcript: Arc<Mutex<TranscriptView>>,
}

impl VoiceClient {
    /// Dial the server and run the offer/answer exchange
    ///
    /// Trickle ICE: the offer goes up immediately and candidates follow via
    /// the relay as they are discovered.
    pub async fn connect(
        api: SignalingApi,
        capture: Arc<dyn AudioCapture>,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let discovery = api.discover().await?;
        if discovery.transport != "webrtc" {
            return Err(ClientError::InvalidResponse(format!(
                "Unsupported transport \"{}\"",
                discovery.transport
            )));
        }

        let webrtc_api = media_api().map_err(|e| ClientError::Transport(e.to_string()))?;
        let pc = Arc::new(
            webrtc_api
                .new_peer_connection(rtc_configuration(&discovery.ice_servers))
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?,
        );

        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(channels::CLIENT_EVENTS);
        let transcript = Arc::new(Mutex::new(TranscriptView::new()));
        let relay = Arc::new(CandidateRelay::spawn(
            Arc::new(api.clone()) as Arc<dyn CandidateSink>
        ));

        // Transcript channel; the server waits for it before greeting
        let dc = pc
            .create_data_channel(webrtc_constants::EVENT_CHANNEL_LABEL, None)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        {
            let transcript = Arc::clone(&transcript);
            let event_tx = event_tx.clone();
            dc.on_message(Box::new(move |message: DataChannelMessage| {
                let event = parse_event(&message.data);
                let transcript = Arc::clone(&transcript);
                let event_tx = event_tx.clone();
                Box::pin(async move {
                    match event {
                        Ok(event) => {
                            transcript.lock().apply(event.clone());
                            let _ = event_tx.send(ClientEvent::Transcript(event)).await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Unparseable transcript event");
                        }
                    }
                })
            }));
        }

        // Local candidates queue on the relay until the id arrives
        {
            let relay = Arc::clone(&relay);
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(candidate) = candidate {
                    relay.push(IceCandidate::from(candidate));
                }
                Box::pin(async {})
            }));
        }

        {
            let event_tx = event_tx.clone();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let event = match s {
                    RTCPeerConnectionState::Connected => Some(ClientEvent::Connected),
                    RTCPeerConnectionState::Failed => Some(ClientEvent::Failed),
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        Some(ClientEvent::Disconnected {
                            reason: format!("{s}"),
                        })
                    }
                    _ => None,
                };
                let event_tx = event_tx.clone();
                Box::pin(async move {
                    if let Some(event) = event {
                        let _ = event_tx.send(event).await;
                    }
                })
            }));
        }

        // Upstream audio track fed from the capture source
        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_string(),
            "voicebridge-client".to_string(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        start_capture(capture, track).await?;

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let answer = api.send_offer(&offer.sdp).await?;
        let remote = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        pc.set_remote_description(remote)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        relay.set_connection_id(answer.connection_id.clone());
        tracing::info!(connection_id = %answer.connection_id, "Call connected");

        Ok((
            Self {
                pc,
                connection_id: answer.connection_id,
                relay,
                transcript,
            },
            event_rx,
        ))
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Snapshot of the running transcript
    pub fn transcript(&self) -> TranscriptView {
        self.transcript.lock().clone()
    }

    /// Hang up; the transcript view resets
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.relay.stop();
        self.pc
            .close()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        self.transcript.lock().reset();
        Ok(())
    }
}

fn parse_event(data: &[u8]) -> Result<TranscriptEvent, ClientError> {
    serde_json::from_slice(data).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

/// Open the capture source and forward its frames to the outgoing track
///
/// Device failures surface here, before any offer is posted.
async fn start_capture(
    capture: Arc<dyn AudioCapture>,
    track: Arc<TrackLocalStaticSample>,
) -> Result<(), ClientError> {
    let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(channels::AUDIO_FRAMES);
    let frame_duration = capture.frame_duration();
    capture.start(frame_tx).await?;

    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let sample = Sample {
                data: frame,
                duration: frame_duration,
                ..Default::default()
            };
            if track.write_sample(&sample).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

fn rtc_configuration(servers: &[IceServer]) -> RTCConfiguration {
    // Discovery may return an empty list; fall back to the public default
    let fallback = [IceServer::default()];
    let servers = if servers.is_empty() {
        &fallback[..]
    } else {
        servers
    };
    RTCConfiguration {
        ice_servers: servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event() {
        let event = parse_event(br#"{"type":"text","role":"assistant","text":"hi","is_final":false}"#)
            .unwrap();
        assert_eq!(event.text, "hi");
        assert!(!event.is_final);

        assert!(parse_event(b"not json").is_err());
    }

    struct DeniedCapture;

    #[async_trait]
    impl AudioCapture for DeniedCapture {
        async fn start(&self, _frames: mpsc::Sender<Bytes>) -> Result<(), ClientError> {
            Err(ClientError::MediaAccess(
                "microphone permission denied".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn test_connect_fails_when_capture_is_denied() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let offer_posted = Arc::new(AtomicBool::new(false));
        let offer_flag = Arc::clone(&offer_posted);
        let app = axum::Router::new()
            .route(
                "/",
                axum::routing::get(|| async {
                    axum::Json(serde_json::json!({
                        "transport": "webrtc",
                        "url": "http://127.0.0.1:0/offer",
                        "ice_servers": [],
                    }))
                }),
            )
            .route(
                "/offer",
                axum::routing::post(move || {
                    offer_flag.store(true, Ordering::SeqCst);
                    async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let api = SignalingApi::new(format!("http://{addr}"), None).unwrap();
        let result = VoiceClient::connect(api, Arc::new(DeniedCapture)).await;
        assert!(matches!(result, Err(ClientError::MediaAccess(_))));
        // The dial stops before any offer reaches the server
        assert!(!offer_posted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rtc_configuration_falls_back_to_default_stun() {
        let config = rtc_configuration(&[]);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(
            config.ice_servers[0].urls[0],
            webrtc_constants::DEFAULT_STUN_URL
        );
    }

    #[test]
    fn test_rtc_configuration_maps_credentials() {
        let servers = vec![IceServer {
            urls: vec!["turn:turn.example.org:3478".to_string()],
            username: Some("u".to_string()),
            credential: Some("c".to_string()),
        }];
        let config = rtc_configuration(&servers);
        assert_eq!(config.ice_servers[0].username, "u");
        assert_eq!(config.ice_servers[0].credential, "c");
    }

    #[tokio::test]
    async fn test_offer_includes_event_channel() {
        // Offline check that the local offer carries both the audio section
        // and the data channel the server expects
        let api = media_api().unwrap();
        let pc = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap();
        pc.create_data_channel(webrtc_constants::EVENT_CHANNEL_LABEL, None)
            .await
            .unwrap();
        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_string(),
            "test".to_string(),
        ));
        pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=application"));
        let _ = pc.close().await;
    }
}
