//! Conversation bot for voicebridge
//!
//! One bot per WebRTC connection: greets when the event channel opens, then
//! loops listen/respond until the peer goes away or the task is aborted.

mod state;
mod task;

pub use state::{BotLifecycle, BotState};
pub use task::{BotHandle, BotStages, BotTask, EventOutlet};
