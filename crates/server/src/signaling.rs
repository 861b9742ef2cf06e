//! Signaling endpoints
//!
//! The WebRTC handshake over plain HTTP: discovery, offer/answer, and
//! trickle ICE. Connection ids are minted server-side and returned with the
//! answer; everything after the handshake flows over the peer connection.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use voicebridge_bot::{BotStages, BotTask};
use voicebridge_config::Settings;
use voicebridge_pipeline::{CartesiaTts, DeepgramStt, OpenAiCompletion, PipelineError};
use voicebridge_transport::{IceCandidate, IceServer, PeerSession, TransportError, WebRtcConfig};

use crate::metrics::{record_candidate_batch, record_offer};
use crate::registry::Connection;
use crate::state::AppState;
use crate::ServerError;

/// Body of `POST /offer`
#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional caller name, used to personalize the greeting
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Body of the answer returned by `POST /offer`
#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

/// Body of `POST /candidate`
#[derive(Debug, Deserialize)]
pub struct CandidateRequest {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    pub candidates: Vec<IceCandidate>,
}

fn error_response(err: ServerError) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from(&err);
    (status, Json(json!({ "error": err.to_string() })))
}

/// `GET /` - transport discovery
///
/// Tells clients how to reach the signaling endpoint and which ICE servers
/// to use. The payload is computed once at startup and reused for every
/// request.
pub async fn discovery(State(state): State<AppState>) -> Json<Value> {
    Json(state.discovery.as_ref().clone())
}

/// Discovery payload advertised by `GET /`
pub(crate) fn build_discovery(settings: &Settings) -> Value {
    json!({
        "transport": "webrtc",
        "url": format!("{}/offer", settings.server.public_url.trim_end_matches('/')),
        "ice_servers": build_ice_servers(settings),
    })
}

/// `POST /offer` - accept an SDP offer, spawn a bot, return the answer
pub async fn handle_offer(
    State(state): State<AppState>,
    Json(request): Json<OfferRequest>,
) -> Result<Json<AnswerResponse>, (StatusCode, Json<Value>)> {
    let started = Instant::now();

    let result = accept_offer(&state, request).await;
    let accepted = result.is_ok();
    record_offer(
        accepted,
        started.elapsed().as_secs_f64(),
        state.connections.len(),
    );

    result.map_err(error_response)
}

async fn accept_offer(
    state: &AppState,
    request: OfferRequest,
) -> Result<Json<AnswerResponse>, ServerError> {
    if request.kind != "offer" {
        return Err(ServerError::BadOffer(format!(
            "Expected type \"offer\", got \"{}\"",
            request.kind
        )));
    }
    if state.connections.at_capacity() {
        return Err(ServerError::Capacity);
    }

    let settings = state.config.read().clone();

    // Credentials are checked before any transport work so a misconfigured
    // server fails fast instead of after ICE gathering
    settings
        .require_service_credentials()
        .map_err(|e| ServerError::PipelineSetup(e.to_string()))?;
    let stages = build_stages(&settings).map_err(|e| ServerError::PipelineSetup(e.to_string()))?;

    let transport = Arc::new(
        PeerSession::new(WebRtcConfig {
            ice_servers: build_ice_servers(&settings),
        })
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?,
    );

    let connection_id = state.connections.mint_id();

    // The bot registers its sinks before negotiation starts, so the channel
    // open event cannot be missed
    let bot = BotTask::spawn(
        connection_id.clone(),
        Arc::clone(&transport),
        stages,
        &settings.agent,
        request.display_name.as_deref(),
    );

    let answer_sdp = match transport.accept_offer(&request.sdp).await {
        Ok(sdp) => sdp,
        Err(e) => {
            bot.abort();
            let _ = transport.close().await;
            return Err(match e {
                TransportError::BadDescription(msg) => ServerError::BadOffer(msg),
                other => ServerError::Internal(other.to_string()),
            });
        }
    };

    let connection = Connection::new(connection_id.clone(), Arc::clone(&transport), bot);
    if !state.connections.insert(connection) {
        // Raced to capacity between the check and the insert
        let _ = transport.close().await;
        return Err(ServerError::Capacity);
    }

    tracing::info!(connection_id = %connection_id, "Connection accepted");
    Ok(Json(AnswerResponse {
        sdp: answer_sdp,
        kind: "answer",
        connection_id,
    }))
}

/// `POST /candidate` - apply a batch of remote trickle-ICE candidates
///
/// Candidates are applied in batch order. Unusable entries (empty string,
/// no media section context) are skipped, and a per-candidate apply failure
/// is logged without failing the batch.
pub async fn handle_candidates(
    State(state): State<AppState>,
    Json(request): Json<CandidateRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let connection = state
        .connections
        .get(&request.connection_id)
        .ok_or_else(|| {
            error_response(ServerError::UnknownConnection(request.connection_id.clone()))
        })?;

    let mut applied = 0u64;
    let mut skipped = 0u64;
    for candidate in &request.candidates {
        if !candidate.is_applicable() {
            tracing::debug!(connection_id = %request.connection_id, "Skipping unusable candidate");
            skipped += 1;
            continue;
        }
        match connection.transport.add_remote_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => {
                tracing::warn!(
                    connection_id = %request.connection_id,
                    error = %e,
                    "Failed to apply ICE candidate"
                );
                skipped += 1;
            }
        }
    }

    record_candidate_batch(applied, skipped);
    Ok(Json(json!({ "status": "ok" })))
}

/// `GET /connections` - live connection ids, for operations
pub async fn list_connections(State(state): State<AppState>) -> Json<Value> {
    let ids = state.connections.ids();
    Json(json!({
        "count": ids.len(),
        "connections": ids,
    }))
}

fn build_stages(settings: &Settings) -> Result<BotStages, PipelineError> {
    Ok(BotStages {
        stt: Arc::new(DeepgramStt::new(settings.stt.clone())?),
        llm: Arc::new(OpenAiCompletion::new(settings.llm.clone())?),
        tts: Arc::new(CartesiaTts::new(settings.tts.clone())?),
    })
}

fn build_ice_servers(settings: &Settings) -> Vec<IceServer> {
    let mut servers = vec![IceServer {
        urls: settings.ice_server_urls(),
        username: None,
        credential: None,
    }];
    for turn in &settings.ice.turn_servers {
        servers.push(IceServer {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_request_wire_format() {
        let request: OfferRequest =
            serde_json::from_str(r#"{"sdp":"v=0...","type":"offer"}"#).unwrap();
        assert_eq!(request.kind, "offer");
        assert!(request.display_name.is_none());
    }

    #[test]
    fn test_answer_wire_format() {
        let answer = AnswerResponse {
            sdp: "v=0...".to_string(),
            kind: "answer",
            connection_id: "abc-123".to_string(),
        };
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["connectionId"], "abc-123");
    }

    #[test]
    fn test_candidate_request_wire_format() {
        let request: CandidateRequest = serde_json::from_str(
            r#"{
                "connectionId": "abc",
                "candidates": [
                    {"candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ host",
                     "sdp_mid": "audio", "sdp_mline_index": 0}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(request.connection_id, "abc");
        assert_eq!(request.candidates.len(), 1);
    }

    #[test]
    fn test_ice_servers_include_turn() {
        let mut settings = Settings::default();
        settings.ice.turn_servers.push(voicebridge_config::TurnServerConfig {
            url: "turn:turn.example.org:3478".to_string(),
            username: "u".to_string(),
            credential: "c".to_string(),
        });

        let servers = build_ice_servers(&settings);
        assert_eq!(servers.len(), 2);
        assert!(servers[0].urls[0].starts_with("stun:"));
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }
}
