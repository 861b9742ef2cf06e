//! Cartesia speech synthesis adapter

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use voicebridge_config::constants::service;
use voicebridge_config::TtsConfig;

use crate::traits::SpeechSynthesis;
use crate::PipelineError;

const CARTESIA_VERSION: &str = "2024-06-10";
const MODEL_ID: &str = "sonic-english";

/// Hosted Cartesia synthesizer
///
/// Streams encoded audio back chunk by chunk so playback can start before
/// the full reply is rendered.
pub struct CartesiaTts {
    config: TtsConfig,
    api_key: String,
    client: Client,
}

impl CartesiaTts {
    pub fn new(config: TtsConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::Setup("TTS API key not configured".to_string()))?;

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
impl SpeechSynthesis for CartesiaTts {
    async fn synthesize(&self, text: &str, tx: mpsc::Sender<Bytes>) -> Result<(), PipelineError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let request = TtsRequest {
            model_id: MODEL_ID,
            transcript: text,
            voice: VoiceSpec {
                mode: "id",
                id: &self.config.voice_id,
            },
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: 48000,
            },
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .header("Cartesia-Version", CARTESIA_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api(format!("HTTP {status}: {body}")));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(PipelineError::Network)?;
            if chunk.is_empty() {
                continue;
            }
            if tx.send(chunk).await.is_err() {
                // Playback side gone; stop pulling
                break;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: VoiceSpec<'a>,
    output_format: OutputFormat<'a>,
}

#[derive(Debug, Serialize)]
struct VoiceSpec<'a> {
    mode: &'a str,
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct OutputFormat<'a> {
    container: &'a str,
    encoding: &'a str,
    sample_rate: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_setup_error() {
        let config = TtsConfig {
            api_key: None,
            endpoint: "https://api.cartesia.ai/tts/bytes".to_string(),
            voice_id: "voice".to_string(),
        };
        assert!(matches!(
            CartesiaTts::new(config),
            Err(PipelineError::Setup(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let request = TtsRequest {
            model_id: MODEL_ID,
            transcript: "hello",
            voice: VoiceSpec {
                mode: "id",
                id: "v1",
            },
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: 48000,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["voice"]["mode"], "id");
        assert_eq!(json["output_format"]["sample_rate"], 48000);
    }

    #[tokio::test]
    async fn test_empty_text_is_noop() {
        let config = TtsConfig {
            api_key: Some("key".to_string()),
            endpoint: "https://api.cartesia.ai/tts/bytes".to_string(),
            voice_id: "voice".to_string(),
        };
        let tts = CartesiaTts::new(config).unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        tts.synthesize("   ", tx).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
