//! Centralized constants shared across crates

/// WebRTC negotiation constants
pub mod webrtc {
    /// Public STUN server used when no ICE servers are configured
    pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

    /// How long to wait for ICE gathering before answering with a partial set
    pub const ICE_GATHER_TIMEOUT_SECS: u64 = 10;

    /// ICE agent disconnect detection timeout
    pub const ICE_DISCONNECTED_TIMEOUT_SECS: u64 = 5;

    /// ICE agent failure timeout
    pub const ICE_FAILED_TIMEOUT_SECS: u64 = 25;

    /// ICE keepalive interval
    pub const ICE_KEEPALIVE_INTERVAL_SECS: u64 = 2;

    /// Label of the transcript/event data channel opened by the client
    pub const EVENT_CHANNEL_LABEL: &str = "events";
}

/// External service call constants
pub mod service {
    /// Bounded timeout for any single STT/LLM/TTS call; exceeding it is a
    /// transient failure, not a connection failure
    pub const CALL_TIMEOUT_SECS: u64 = 30;

    /// Retry attempts for transient HTTP failures
    pub const MAX_RETRIES: u32 = 3;

    /// Initial retry backoff, doubled each attempt
    pub const INITIAL_BACKOFF_MS: u64 = 100;
}

/// Channel capacities
pub mod channels {
    /// Transport event channel depth per connection
    pub const TRANSPORT_EVENTS: usize = 100;

    /// Inbound audio frame channel depth per connection
    pub const AUDIO_FRAMES: usize = 100;

    /// Client status event channel depth
    pub const CLIENT_EVENTS: usize = 32;
}

/// Server limits
pub mod server {
    /// Maximum simultaneous connections before offers are rejected
    pub const MAX_CONNECTIONS: usize = 100;
}
