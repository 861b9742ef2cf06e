//! Stage traits
//!
//! Each trait covers one leg of the voice turn: inbound audio to text, text
//! to a reply, reply to outbound audio. Adapters are created once per
//! connection and shared with the bot task behind `Arc<dyn ...>`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use voicebridge_core::Message;

use crate::PipelineError;

/// One piece of recognized speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub text: String,
    /// End of an utterance; a final fragment triggers a response turn
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn utterance(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Speech recognition stage
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a buffered chunk of encoded audio
    ///
    /// Returns zero or more fragments; silence yields an empty vec.
    async fn transcribe(&self, audio: Bytes) -> Result<Vec<TranscriptFragment>, PipelineError>;
}

/// Response generation stage
#[async_trait]
pub trait Completion: Send + Sync {
    /// Generate the full reply for the dialogue so far
    async fn generate(&self, messages: &[Message]) -> Result<String, PipelineError>;

    /// Generate a reply, delivering text deltas on `tx` as they arrive
    ///
    /// Returns the assembled reply. Deltas already sent are not retracted on
    /// error; the caller decides how to surface a mid-stream failure.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<String, PipelineError>;
}

/// Speech synthesis stage
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Synthesize `text`, delivering encoded audio chunks on `tx`
    async fn synthesize(&self, text: &str, tx: mpsc::Sender<Bytes>) -> Result<(), PipelineError>;
}
