//! Speech pipeline stages for voicebridge
//!
//! Three seams, one per external service: [`SpeechToText`], [`Completion`],
//! and [`SpeechSynthesis`]. The bot task only sees the traits; the hosted
//! adapters ([`DeepgramStt`], [`OpenAiCompletion`], [`CartesiaTts`]) live
//! behind them so tests can substitute deterministic stages.

mod error;
mod llm;
mod stt;
mod traits;
mod tts;

pub use error::PipelineError;
pub use llm::OpenAiCompletion;
pub use stt::DeepgramStt;
pub use traits::{Completion, SpeechSynthesis, SpeechToText, TranscriptFragment};
pub use tts::CartesiaTts;
