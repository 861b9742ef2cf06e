//! Per-connection bot task
//!
//! One tokio task per accepted offer. The task owns the dialogue history and
//! drives the turn loop: buffered caller audio goes through STT, a final
//! utterance triggers a streamed completion, and the reply is spoken back
//! over the audio track while text deltas go out on the event channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voicebridge_config::constants::channels;
use voicebridge_config::AgentConfig;
use voicebridge_core::{Dialogue, TranscriptEvent};
use voicebridge_pipeline::{Completion, PipelineError, SpeechSynthesis, SpeechToText};
use voicebridge_transport::{PeerSession, TransportError, TransportEvent};

use crate::state::{BotLifecycle, BotState};

/// How long buffered audio may sit before it is sent for recognition
const UTTERANCE_WINDOW: Duration = Duration::from_millis(1200);

/// Buffers smaller than this are kept for the next window (too short to
/// carry speech)
const MIN_UTTERANCE_BYTES: usize = 4_800;

/// pcm_s16le, 48kHz, stereo
const AUDIO_BYTES_PER_SEC: u64 = 48_000 * 2 * 2;

/// Where the bot writes its output
///
/// [`PeerSession`] is the production impl; tests substitute a recorder.
#[async_trait]
pub trait EventOutlet: Send + Sync {
    async fn send_event(&self, event: &TranscriptEvent) -> Result<(), TransportError>;
    async fn write_audio(&self, data: Bytes, duration: Duration) -> Result<(), TransportError>;
}

#[async_trait]
impl EventOutlet for PeerSession {
    async fn send_event(&self, event: &TranscriptEvent) -> Result<(), TransportError> {
        PeerSession::send_event(self, event).await
    }

    async fn write_audio(&self, data: Bytes, duration: Duration) -> Result<(), TransportError> {
        PeerSession::write_audio(self, data, duration).await
    }
}

/// The three pipeline stages a bot speaks through
pub struct BotStages {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn Completion>,
    pub tts: Arc<dyn SpeechSynthesis>,
}

/// Handle to a spawned bot task
///
/// Dropping the handle does not stop the task; call [`BotHandle::abort`].
/// Teardown never awaits the task.
pub struct BotHandle {
    task: JoinHandle<()>,
}

impl BotHandle {
    /// Wrap an already-spawned task
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// The conversation loop for one connection
pub struct BotTask<O: EventOutlet> {
    connection_id: String,
    outlet: Arc<O>,
    stages: BotStages,
    dialogue: Dialogue,
    lifecycle: BotLifecycle,
    greeting_directive: String,
}

impl BotTask<PeerSession> {
    /// Spawn the bot for an accepted connection
    ///
    /// Registers the event and audio sinks on the transport before the loop
    /// starts, so no lifecycle event is missed.
    pub fn spawn(
        connection_id: String,
        transport: Arc<PeerSession>,
        stages: BotStages,
        agent: &AgentConfig,
        display_name: Option<&str>,
    ) -> BotHandle {
        let (event_tx, event_rx) = mpsc::channel(channels::TRANSPORT_EVENTS);
        let (audio_tx, audio_rx) = mpsc::channel(channels::AUDIO_FRAMES);
        transport.set_event_callback(event_tx);
        transport.set_audio_sink(audio_tx);

        let bot = BotTask {
            connection_id: connection_id.clone(),
            outlet: transport,
            stages,
            dialogue: Dialogue::seeded(&agent.persona),
            lifecycle: BotLifecycle::new(),
            greeting_directive: agent.greeting_directive(display_name),
        };

        let task = tokio::spawn(async move {
            bot.run(event_rx, audio_rx).await;
            tracing::info!(connection_id = %connection_id, "Bot task finished");
        });

        BotHandle { task }
    }
}

impl<O: EventOutlet + 'static> BotTask<O> {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut audio: mpsc::Receiver<Bytes>,
    ) {
        let mut buffer = BytesMut::new();
        let mut flush = tokio::time::interval(UTTERANCE_WINDOW);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(TransportEvent::ChannelOpen) => {
                            if self.lifecycle.advance(BotState::Greeting) {
                                self.deliver_greeting().await;
                                self.lifecycle.advance(BotState::Listening);
                            }
                        }
                        Some(TransportEvent::Connected) => {
                            tracing::info!(connection_id = %self.connection_id, "Peer connected");
                        }
                        Some(TransportEvent::Disconnected { reason }) => {
                            tracing::info!(connection_id = %self.connection_id, %reason, "Peer gone");
                            break;
                        }
                        Some(TransportEvent::Failed) => {
                            tracing::warn!(connection_id = %self.connection_id, "Negotiation failed");
                            break;
                        }
                        None => break,
                    }
                }
                frame = audio.recv() => {
                    match frame {
                        Some(frame) if self.lifecycle.state() == BotState::Listening => {
                            buffer.extend_from_slice(&frame);
                        }
                        // Frames arriving mid-response are dropped, not queued
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = flush.tick() => {
                    if self.lifecycle.state() == BotState::Listening
                        && buffer.len() >= MIN_UTTERANCE_BYTES
                    {
                        let chunk = buffer.split().freeze();
                        self.handle_utterance(chunk).await;
                    }
                }
            }
        }

        self.lifecycle.advance(BotState::Closed);
    }

    async fn deliver_greeting(&mut self) {
        self.dialogue.push_system(self.greeting_directive.clone());
        if let Err(e) = self.response_turn().await {
            self.report_failure(&e, "greeting").await;
        }
    }

    async fn handle_utterance(&mut self, audio: Bytes) {
        let fragments = match self.stages.stt.transcribe(audio).await {
            Ok(fragments) => fragments,
            Err(e) => {
                self.report_failure(&e, "transcription").await;
                return;
            }
        };

        for fragment in fragments {
            let event = TranscriptEvent::transcription(&fragment.text, fragment.is_final);
            self.emit(&event).await;

            if fragment.is_final {
                self.dialogue.push_user(&fragment.text);
                if self.lifecycle.advance(BotState::Responding) {
                    if let Err(e) = self.response_turn().await {
                        self.report_failure(&e, "response").await;
                    }
                    self.lifecycle.advance(BotState::Listening);
                }
            }
        }
    }

    /// One assistant turn: stream the completion out as text events, commit
    /// it to history, then speak it.
    async fn response_turn(&mut self) -> Result<(), PipelineError> {
        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(channels::CLIENT_EVENTS);

        let llm = Arc::clone(&self.stages.llm);
        let messages = self.dialogue.messages().to_vec();
        let generation =
            tokio::spawn(async move { llm.generate_stream(&messages, delta_tx).await });

        while let Some(delta) = delta_rx.recv().await {
            self.emit(&TranscriptEvent::text(&delta, false)).await;
        }

        let reply = generation
            .await
            .map_err(|e| PipelineError::InvalidResponse(format!("Generation task failed: {e}")))??;

        // Close the assistant turn on the transcript channel
        self.emit(&TranscriptEvent::text("", true)).await;

        if reply.is_empty() {
            return Ok(());
        }
        self.dialogue.push_assistant(&reply);
        self.speak(&reply).await
    }

    async fn speak(&self, text: &str) -> Result<(), PipelineError> {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Bytes>(channels::AUDIO_FRAMES);

        let tts = Arc::clone(&self.stages.tts);
        let text = text.to_string();
        let synthesis = tokio::spawn(async move { tts.synthesize(&text, chunk_tx).await });

        while let Some(chunk) = chunk_rx.recv().await {
            let millis = (chunk.len() as u64 * 1000) / AUDIO_BYTES_PER_SEC;
            let duration = Duration::from_millis(millis.max(1));
            if let Err(e) = self.outlet.write_audio(chunk, duration).await {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "Audio write failed");
                break;
            }
        }

        synthesis
            .await
            .map_err(|e| PipelineError::InvalidResponse(format!("Synthesis task failed: {e}")))?
    }

    /// Transient failures are reported in-band and the session continues;
    /// anything else only gets logged since the loop is about to end anyway.
    async fn report_failure(&self, error: &PipelineError, stage: &str) {
        tracing::warn!(
            connection_id = %self.connection_id,
            stage,
            error = %error,
            "Pipeline stage failed"
        );
        if error.is_transient() {
            self.emit(&TranscriptEvent::error(format!("{stage} failed: {error}")))
                .await;
        }
    }

    async fn emit(&self, event: &TranscriptEvent) {
        if let Err(e) = self.outlet.send_event(event).await {
            // Channel races close with the last few events; not fatal
            tracing::debug!(connection_id = %self.connection_id, error = %e, "Event not delivered");
        }
    }
}
