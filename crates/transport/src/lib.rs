//! WebRTC transport for voicebridge
//!
//! Wraps the `webrtc` crate behind a small session type. The signaling
//! server owns one [`PeerSession`] per connection; the bot task talks to it
//! through the event data channel and the outbound audio track.

mod error;
mod webrtc;

pub use error::TransportError;
pub use self::webrtc::{
    media_api, opus_capability, ConnectionState, IceCandidate, IceServer, PeerSession,
    TransportEvent, WebRtcConfig,
};
