//! Core types for the voicebridge voice assistant
//!
//! This crate provides the foundational types used across all other crates:
//! - Conversation roles and dialogue history
//! - Transcript channel events and the client-side coalescing view

pub mod conversation;
pub mod transcript;

pub use conversation::{Dialogue, Message, Role, TurnRole};
pub use transcript::{EventKind, TranscriptEvent, TranscriptTurn, TranscriptView};
