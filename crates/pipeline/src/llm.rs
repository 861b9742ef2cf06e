//! OpenAI-compatible completion adapter
//!
//! Chat-completions client with SSE streaming. Non-streaming calls retry
//! transient failures with doubling backoff; streaming calls do not retry,
//! since deltas already delivered cannot be retracted.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use voicebridge_config::constants::service;
use voicebridge_config::LlmConfig;
use voicebridge_core::Message;

use crate::traits::Completion;
use crate::PipelineError;

pub struct OpenAiCompletion {
    config: LlmConfig,
    api_key: String,
    client: Client,
}

impl OpenAiCompletion {
    pub fn new(config: LlmConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::Setup("LLM API key not configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(PipelineError::Network)?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    async fn post_request(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response, PipelineError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            stream,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout(self.config.timeout_secs)
                } else {
                    PipelineError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl Completion for OpenAiCompletion {
    async fn generate(&self, messages: &[Message]) -> Result<String, PipelineError> {
        let mut backoff = Duration::from_millis(service::INITIAL_BACKOFF_MS);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(attempt, backoff_ms = backoff.as_millis() as u64, "Retrying completion");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.post_request(messages, false).await {
                Ok(response) => {
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| PipelineError::InvalidResponse(e.to_string()))?;
                    let content = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.map(|m| m.content))
                        .ok_or_else(|| {
                            PipelineError::InvalidResponse("No choices in response".to_string())
                        })?;
                    return Ok(content);
                }
                Err(e) if e.is_transient() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| PipelineError::Api("Retries exhausted".to_string())))
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<String, PipelineError> {
        let response = self.post_request(messages, true).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(PipelineError::Network)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE events are newline-delimited; a chunk may split one
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                if let Some(delta) = parse_sse_delta(&line)? {
                    full_text.push_str(&delta);
                    if tx.send(delta).await.is_err() {
                        // Receiver gone: the turn was abandoned
                        return Ok(full_text);
                    }
                }
            }
        }

        Ok(full_text)
    }
}

/// Extract the content delta from one SSE line, if it carries one
fn parse_sse_delta(line: &str) -> Result<Option<String>, PipelineError> {
    let Some(data) = line.strip_prefix("data: ") else {
        return Ok(None);
    };
    if data == "[DONE]" {
        return Ok(None);
    }

    let event: StreamChunk = serde_json::from_str(data)
        .map_err(|e| PipelineError::InvalidResponse(format!("Bad SSE event: {e}")))?;

    Ok(event
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty()))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: m.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".to_string()),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }

    #[test]
    fn test_missing_key_is_setup_error() {
        let mut config = config_with_key();
        config.api_key = None;
        assert!(matches!(
            OpenAiCompletion::new(config),
            Err(PipelineError::Setup(_))
        ));
    }

    #[test]
    fn test_construction_with_key() {
        assert!(OpenAiCompletion::new(config_with_key()).is_ok());
    }

    #[test]
    fn test_sse_delta_parsing() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_sse_delta(line).unwrap(), Some("Hello".to_string()));

        assert_eq!(parse_sse_delta("data: [DONE]").unwrap(), None);
        assert_eq!(parse_sse_delta("").unwrap(), None);
        assert_eq!(parse_sse_delta(": keepalive").unwrap(), None);

        // Role-only first chunk carries no content
        let first = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_delta(first).unwrap(), None);
    }

    #[test]
    fn test_sse_garbage_is_invalid_response() {
        assert!(matches!(
            parse_sse_delta("data: {not json"),
            Err(PipelineError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_wire_message_roles() {
        let m = Message::system("be brief");
        let wire = WireMessage::from(&m);
        assert_eq!(wire.role, "system");
    }
}
