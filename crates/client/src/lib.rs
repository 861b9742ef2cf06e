//! Native voicebridge client
//!
//! Dials a voicebridge server: HTTP signaling, WebRTC media, and a running
//! transcript view fed by the event data channel.

mod client;
mod error;
mod relay;
mod signaling;

pub use client::{AudioCapture, ClientEvent, VoiceClient};
pub use error::ClientError;
pub use relay::{CandidateRelay, CandidateSink};
pub use signaling::{Answer, Discovery, SignalingApi};
