//! HTTP signaling API
//!
//! Thin reqwest wrapper over the server's discovery, offer, and candidate
//! endpoints.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use voicebridge_config::constants::service;
use voicebridge_transport::{IceCandidate, IceServer};

use crate::ClientError;

/// Discovery payload from `GET /`
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub transport: String,
    /// Offer endpoint URL
    pub url: String,
    pub ice_servers: Vec<IceServer>,
}

/// Answer payload from `POST /offer`
#[derive(Debug, Clone, Deserialize)]
pub struct Answer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

/// Client for the signaling endpoints
#[derive(Clone)]
pub struct SignalingApi {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl SignalingApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(service::CALL_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    pub async fn discover(&self) -> Result<Discovery, ClientError> {
        let response = self
            .request(self.http.get(&self.base_url))
            .send()
            .await?;
        Self::check(&response)?;
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn send_offer(&self, sdp: &str) -> Result<Answer, ClientError> {
        let response = self
            .request(self.http.post(format!("{}/offer", self.base_url)))
            .json(&json!({ "sdp": sdp, "type": "offer" }))
            .send()
            .await?;
        Self::check(&response)?;

        let answer: Answer = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        if answer.kind != "answer" {
            return Err(ClientError::InvalidResponse(format!(
                "Expected type \"answer\", got \"{}\"",
                answer.kind
            )));
        }
        Ok(answer)
    }

    pub async fn send_candidates(
        &self,
        connection_id: &str,
        candidates: &[IceCandidate],
    ) -> Result<(), ClientError> {
        let response = self
            .request(self.http.post(format!("{}/candidate", self.base_url)))
            .json(&json!({
                "connectionId": connection_id,
                "candidates": candidates,
            }))
            .send()
            .await?;
        Self::check(&response)
    }

    fn check(response: &reqwest::Response) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Signaling(format!("HTTP {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let api = SignalingApi::new("http://localhost:7860/", None).unwrap();
        assert_eq!(api.base_url, "http://localhost:7860");
    }

    #[test]
    fn test_answer_parsing() {
        let answer: Answer = serde_json::from_str(
            r#"{"sdp":"v=0...","type":"answer","connectionId":"abc-123"}"#,
        )
        .unwrap();
        assert_eq!(answer.connection_id, "abc-123");
        assert_eq!(answer.kind, "answer");
    }

    #[test]
    fn test_discovery_parsing() {
        let discovery: Discovery = serde_json::from_str(
            r#"{
                "transport": "webrtc",
                "url": "http://localhost:7860/offer",
                "ice_servers": [{"urls": ["stun:stun.l.google.com:19302"]}]
            }"#,
        )
        .unwrap();
        assert_eq!(discovery.transport, "webrtc");
        assert_eq!(discovery.ice_servers.len(), 1);
    }
}
