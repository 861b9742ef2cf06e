//! Deepgram speech recognition adapter

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use voicebridge_config::constants::service;
use voicebridge_config::SttConfig;

use crate::traits::{SpeechToText, TranscriptFragment};
use crate::PipelineError;

/// Hosted Deepgram recognizer
///
/// Buffered audio chunks are posted to the pre-recorded endpoint; each call
/// yields at most one final fragment. Empty transcripts (silence, noise) are
/// dropped here rather than surfaced as empty turns.
pub struct DeepgramStt {
    config: SttConfig,
    api_key: String,
    client: Client,
}

impl DeepgramStt {
    pub fn new(config: SttConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::Setup("STT API key not configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(service::CALL_TIMEOUT_SECS))
            .build()
            .map_err(PipelineError::Network)?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    async fn transcribe(&self, audio: Bytes) -> Result<Vec<TranscriptFragment>, PipelineError> {
        if audio.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&[
                ("model", self.config.model.as_str()),
                ("smart_format", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/ogg")
            .body(audio)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api(format!("HTTP {status}: {body}")));
        }

        let parsed: ListenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::InvalidResponse(e.to_string()))?;

        let transcript = parsed
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.trim().to_string())
            .unwrap_or_default();

        if transcript.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(chars = transcript.len(), "Transcribed utterance");
        Ok(vec![TranscriptFragment::utterance(transcript)])
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_setup_error() {
        let config = SttConfig {
            api_key: None,
            endpoint: "https://api.deepgram.com/v1/listen".to_string(),
            model: "nova-2".to_string(),
        };
        let result = DeepgramStt::new(config);
        assert!(matches!(result, Err(PipelineError::Setup(_))));
    }

    #[test]
    fn test_empty_key_is_setup_error() {
        let config = SttConfig {
            api_key: Some(String::new()),
            endpoint: "https://api.deepgram.com/v1/listen".to_string(),
            model: "nova-2".to_string(),
        };
        assert!(DeepgramStt::new(config).is_err());
    }

    #[test]
    fn test_listen_response_parsing() {
        let json = r#"{
            "results": {
                "channels": [
                    {"alternatives": [{"transcript": " hello there "}]}
                ]
            }
        }"#;
        let parsed: ListenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.results.channels[0].alternatives[0].transcript,
            " hello there "
        );
    }
}
