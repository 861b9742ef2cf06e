//! Transcript channel events and the client-side conversation view
//!
//! The bot task emits [`TranscriptEvent`]s over the WebRTC data channel; the
//! client folds them into a running [`TranscriptView`]. The channel is a
//! single in-order stream per connection, so the view does no reordering or
//! deduplication: consecutive non-final events of the same role coalesce by
//! concatenation, and a role change or a final event closes the open turn.

use serde::{Deserialize, Serialize};

use crate::conversation::TurnRole;

/// Kind of event carried on the transcript channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Incremental user speech transcription
    Transcription,
    /// Assistant response text
    Text,
    /// In-band service failure notice; the session stays open
    Error,
}

/// One message on the transcript channel
///
/// Wire form: `{"type": "...", "role": "...", "text": "...", "is_final": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub role: TurnRole,
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn transcription(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            kind: EventKind::Transcription,
            role: TurnRole::User,
            text: text.into(),
            is_final,
        }
    }

    pub fn text(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            kind: EventKind::Text,
            role: TurnRole::Assistant,
            text: text.into(),
            is_final,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            role: TurnRole::Assistant,
            text: text.into(),
            is_final: true,
        }
    }
}

/// One coalesced turn in the transcript view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptTurn {
    pub role: TurnRole,
    pub text: String,
    pub finalized: bool,
}

/// Running conversation transcript maintained by the client
///
/// Never persisted; reset on disconnect.
#[derive(Debug, Default, Clone)]
pub struct TranscriptView {
    turns: Vec<TranscriptTurn>,
    /// Most recent in-band error notice, if any
    last_error: Option<String>,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the view
    pub fn apply(&mut self, event: TranscriptEvent) {
        if event.kind == EventKind::Error {
            self.last_error = Some(event.text);
            return;
        }

        match self.turns.last_mut() {
            Some(open) if !open.finalized && open.role == event.role => {
                open.text.push_str(&event.text);
                open.finalized = event.is_final;
            }
            _ => {
                // Role change or previous turn final: close it and open a new one
                if let Some(open) = self.turns.last_mut() {
                    open.finalized = true;
                }
                self.turns.push(TranscriptTurn {
                    role: event.role,
                    text: event.text,
                    finalized: event.is_final,
                });
            }
        }
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Discard all turns and error state
    pub fn reset(&mut self) {
        self.turns.clear();
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalescing_same_role_fragments() {
        let mut view = TranscriptView::new();
        view.apply(TranscriptEvent::transcription("hello ", false));
        view.apply(TranscriptEvent::transcription("wor", false));
        view.apply(TranscriptEvent::transcription("ld", true));

        assert_eq!(view.turns().len(), 1);
        assert_eq!(view.turns()[0].text, "hello world");
        assert!(view.turns()[0].finalized);
    }

    #[test]
    fn test_role_change_opens_new_turn() {
        let mut view = TranscriptView::new();
        view.apply(TranscriptEvent::transcription("hi", false));
        view.apply(TranscriptEvent::text("hello!", false));

        assert_eq!(view.turns().len(), 2);
        // The interrupted user turn is closed by the role change
        assert!(view.turns()[0].finalized);
        assert_eq!(view.turns()[1].role, TurnRole::Assistant);
        assert!(!view.turns()[1].finalized);
    }

    #[test]
    fn test_final_event_closes_turn() {
        let mut view = TranscriptView::new();
        view.apply(TranscriptEvent::text("one", true));
        view.apply(TranscriptEvent::text("two", true));

        assert_eq!(view.turns().len(), 2);
        assert_eq!(view.turns()[0].text, "one");
        assert_eq!(view.turns()[1].text, "two");
    }

    #[test]
    fn test_error_event_does_not_touch_turns() {
        let mut view = TranscriptView::new();
        view.apply(TranscriptEvent::transcription("hi", false));
        view.apply(TranscriptEvent::error("completion timed out"));

        assert_eq!(view.turns().len(), 1);
        assert!(!view.turns()[0].finalized);
        assert_eq!(view.last_error(), Some("completion timed out"));
    }

    #[test]
    fn test_wire_format() {
        let event = TranscriptEvent::transcription("hello", true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transcription");
        assert_eq!(json["role"], "user");
        assert_eq!(json["is_final"], true);

        let parsed: TranscriptEvent =
            serde_json::from_str(r#"{"type":"text","role":"assistant","text":"hi"}"#).unwrap();
        assert_eq!(parsed.kind, EventKind::Text);
        assert!(!parsed.is_final);
    }

    #[test]
    fn test_reset() {
        let mut view = TranscriptView::new();
        view.apply(TranscriptEvent::text("hi", true));
        view.reset();
        assert!(view.turns().is_empty());
        assert!(view.last_error().is_none());
    }
}
