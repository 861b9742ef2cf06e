//! Bot lifecycle state machine
//!
//! One state per connection. Transitions are checked so a stale event cannot
//! move a closed bot back into the conversation loop.

/// Lifecycle state of a bot task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    /// Created, transport not yet usable
    Idle,
    /// Event channel open, delivering the opening turn
    Greeting,
    /// Waiting for user speech
    Listening,
    /// Generating and speaking a reply
    Responding,
    /// Terminal
    Closed,
}

impl BotState {
    /// Whether moving to `next` is legal from this state
    pub fn can_transition(&self, next: BotState) -> bool {
        use BotState::*;
        match (self, next) {
            // Any live state can close
            (_, Closed) => *self != Closed,
            (Idle, Greeting) => true,
            (Greeting, Listening) => true,
            (Listening, Responding) => true,
            // A failed or finished response turn returns to listening
            (Responding, Listening) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == BotState::Closed
    }
}

/// State holder with checked transitions
#[derive(Debug)]
pub struct BotLifecycle {
    state: BotState,
}

impl BotLifecycle {
    pub fn new() -> Self {
        Self {
            state: BotState::Idle,
        }
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    /// Apply a transition; illegal moves are dropped and logged
    pub fn advance(&mut self, next: BotState) -> bool {
        if self.state.can_transition(next) {
            tracing::debug!(from = ?self.state, to = ?next, "Bot state transition");
            self.state = next;
            true
        } else {
            tracing::debug!(from = ?self.state, to = ?next, "Ignoring illegal bot state transition");
            false
        }
    }
}

impl Default for BotLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lc = BotLifecycle::new();
        assert!(lc.advance(BotState::Greeting));
        assert!(lc.advance(BotState::Listening));
        assert!(lc.advance(BotState::Responding));
        assert!(lc.advance(BotState::Listening));
        assert!(lc.advance(BotState::Closed));
        assert!(lc.state().is_terminal());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut lc = BotLifecycle::new();
        assert!(lc.advance(BotState::Closed));
        assert!(!lc.advance(BotState::Listening));
        assert!(!lc.advance(BotState::Closed));
        assert_eq!(lc.state(), BotState::Closed);
    }

    #[test]
    fn test_no_skipping_greeting() {
        let mut lc = BotLifecycle::new();
        assert!(!lc.advance(BotState::Responding));
        assert!(!lc.advance(BotState::Listening));
        assert_eq!(lc.state(), BotState::Idle);
    }
}
