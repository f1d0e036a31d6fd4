//! Realtime event coordinator.
//!
//! Single consumer of the session's inbound event stream. Events are
//! processed one at a time in arrival order on a dedicated task; handlers
//! mutate coordinator state directly and talk to the outside world through
//! the capability seams in [`CoordinatorCapabilities`]. A failure inside one
//! handler is logged and contained; it never tears down the loop.

pub mod suppress;

pub use suppress::{strip_tool_call_envelope, ToolCallSuppressor};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::core::citations::{CitationTurn, SearchTelemetry, SourcePanelUpdate, SourceRegistry};
use crate::core::protocol::events::ServerEvent;
use crate::core::transcription::TranscriptionReconciler;
use crate::core::types::{CorrectionRecord, Speaker, UtteranceRecord};

/// Debounce window between a turn's final transcript and bubble close, so
/// trailing word events for the same turn can still be de-duplicated.
const FINALIZE_GRACE: Duration = Duration::from_millis(400);

// =============================================================================
// Capability seams
// =============================================================================

/// A word surfaced for turn-taking display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayWordEvent {
    pub speaker: Speaker,
    pub word: String,
    /// Word already shown inside a streaming bubble; render it only in
    /// word-level consumers, not as a new bubble.
    pub skip_bubble: bool,
    /// Dedup key carried by server-side word events
    pub key: Option<String>,
}

/// Rendering surface for streamed and finalized transcript text.
pub trait DisplaySink: Send + Sync {
    /// Append a streamed fragment to the speaker's live bubble. Returns the
    /// words this fragment completed, for word-level consumers.
    fn append_delta(&self, speaker: Speaker, delta: &str) -> Vec<String>;

    /// Replace the speaker's live bubble with its final text.
    fn push_final(&self, speaker: Speaker, text: String);

    /// Surface a single word for turn-taking display.
    fn display_word(&self, event: DisplayWordEvent);
}

/// Consumer of finalized utterances (persistence, analytics).
#[async_trait]
pub trait UtteranceProcessor: Send + Sync {
    async fn on_utterance_added(
        &self,
        utterance: UtteranceRecord,
        device_type: &str,
        transcript_key: Option<&str>,
    ) -> Result<(), CoordinatorError>;

    async fn on_output_audio_stopped(&self) -> Result<(), CoordinatorError>;
}

/// Correction lifecycle surface.
pub trait CorrectionPanel: Send + Sync {
    fn correction_detected(&self, correction: CorrectionRecord);
    fn verification_started(&self, id: &str);
    fn verification_succeeded(&self, id: &str, verification: Option<serde_json::Value>);
    fn verification_failed(&self, id: &str, reason: Option<String>);
}

/// Knowledge search issued by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query_original: Option<String>,
    pub query_en: Option<String>,
}

/// Source-panel surface.
pub trait SourcePanel: Send + Sync {
    fn search_started(&self, query: &SearchQuery);
    fn panel_update(&self, update: SourcePanelUpdate);
}

/// A handler-level failure, contained at the dispatch boundary.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("utterance processor failed: {0}")]
    UtteranceProcessor(String),
}

/// External collaborators wired into the coordinator. Only the display sink
/// is mandatory; every other seam degrades to a logged drop when absent.
pub struct CoordinatorCapabilities {
    pub display: Arc<dyn DisplaySink>,
    pub utterances: Option<Arc<dyn UtteranceProcessor>>,
    pub corrections: Option<Arc<dyn CorrectionPanel>>,
    pub source_panel: Option<Arc<dyn SourcePanel>>,
    pub reconciler: Option<TranscriptionReconciler>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Input to the coordinator task.
#[derive(Debug)]
pub enum CoordinatorInput {
    /// A parsed inbound protocol event
    Event(ServerEvent),
    /// Deferred bubble close for a finalized turn. Stale if `generation`
    /// no longer matches the live turn counter.
    Finalize { speaker: Speaker, generation: u64 },
}

/// One in-flight streamed assistant turn.
struct StreamingTurn {
    id: String,
    /// Everything received, including suppressed tool-call JSON
    raw: String,
    /// Text shown so far, after suppression and citation numbering
    visible: String,
    suppressor: ToolCallSuppressor,
    /// Normalized words already shown by streaming, for word-event dedup
    words: HashSet<String>,
    /// Remapped final transcript awaiting the debounced bubble close
    pending_final: Option<String>,
}

impl StreamingTurn {
    fn open(id: Option<String>) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            raw: String::new(),
            visible: String::new(),
            suppressor: ToolCallSuppressor::new(),
            words: HashSet::new(),
            pending_final: None,
        }
    }
}

/// Handle to a running coordinator task.
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorInput>,
    pub join: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Dispatch a parsed event. Returns `false` if the loop has stopped.
    pub async fn dispatch(&self, event: ServerEvent) -> bool {
        self.tx.send(CoordinatorInput::Event(event)).await.is_ok()
    }

    /// Parse and dispatch a raw data-channel payload. Malformed payloads
    /// are logged and dropped.
    pub async fn dispatch_raw(&self, payload: &str) -> bool {
        match serde_json::from_str::<ServerEvent>(payload) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => {
                warn!(error = %e, "dropping malformed inbound event");
                true
            }
        }
    }
}

/// The event loop state machine.
pub struct RealtimeCoordinator {
    caps: CoordinatorCapabilities,
    citations: CitationTurn,
    ai_turn: Option<StreamingTurn>,
    /// Bumped whenever the live turn changes; stale finalize inputs carry
    /// an older value and are ignored.
    ai_generation: u64,
    /// Keys of server word events already surfaced
    seen_word_keys: HashSet<String>,
    pending_search: Option<SearchTelemetry>,
    search_started_at: Option<Instant>,
    self_tx: mpsc::Sender<CoordinatorInput>,
    finalize_grace: Duration,
}

impl RealtimeCoordinator {
    /// Spawn the coordinator on its own task.
    pub fn spawn(caps: CoordinatorCapabilities, registry: Arc<SourceRegistry>) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(256);
        let coordinator = Self::new(caps, registry, FINALIZE_GRACE, tx.clone());
        let join = tokio::spawn(coordinator.run(rx));
        CoordinatorHandle { tx, join }
    }

    /// Build a coordinator around a caller-owned channel. Used by embedders
    /// and tests that need to drive the loop deterministically.
    pub fn with_channel(
        caps: CoordinatorCapabilities,
        registry: Arc<SourceRegistry>,
        finalize_grace: Duration,
    ) -> (Self, mpsc::Sender<CoordinatorInput>, mpsc::Receiver<CoordinatorInput>) {
        let (tx, rx) = mpsc::channel(64);
        (Self::new(caps, registry, finalize_grace, tx.clone()), tx, rx)
    }

    fn new(
        caps: CoordinatorCapabilities,
        registry: Arc<SourceRegistry>,
        finalize_grace: Duration,
        self_tx: mpsc::Sender<CoordinatorInput>,
    ) -> Self {
        Self {
            caps,
            citations: CitationTurn::new(registry),
            ai_turn: None,
            ai_generation: 0,
            seen_word_keys: HashSet::new(),
            pending_search: None,
            search_started_at: None,
            self_tx,
            finalize_grace,
        }
    }

    /// Drain inputs until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<CoordinatorInput>) {
        while let Some(input) = rx.recv().await {
            self.handle_input(input).await;
        }
        debug!("coordinator loop stopped");
    }

    /// Process one input, containing any handler failure.
    pub async fn handle_input(&mut self, input: CoordinatorInput) {
        match input {
            CoordinatorInput::Event(event) => {
                if let Err(e) = self.handle_event(event).await {
                    warn!(error = %e, "event handler failed; continuing");
                }
            }
            CoordinatorInput::Finalize { speaker: Speaker::Ai, generation } => {
                if generation == self.ai_generation {
                    self.close_ai_bubble();
                }
            }
            CoordinatorInput::Finalize { .. } => {}
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) -> Result<(), CoordinatorError> {
        match event {
            ServerEvent::AudioTranscriptDelta { delta, item_id, response_id } => {
                self.handle_ai_delta(item_id.or(response_id), &delta);
            }
            ServerEvent::TextDelta { delta, item_id, response_id } => {
                self.handle_ai_delta(item_id.or(response_id), &delta);
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.handle_ai_done(&transcript);
            }
            ServerEvent::TextDone { text, .. } => {
                self.handle_ai_done(&text);
            }
            ServerEvent::InputTranscriptionCompleted { transcript, .. } => {
                match self.caps.reconciler.as_mut() {
                    Some(reconciler) => reconciler.handle_transcription_completed(&transcript).await,
                    None => warn!("user transcript arrived with no reconciler wired"),
                }
            }
            ServerEvent::TranscriptWord { word, speaker, key } => {
                self.handle_transcript_word(word, speaker, key);
            }
            ServerEvent::OutputAudioStarted { response_id } => {
                self.rollover_finished_turn();
                if self.ai_turn.is_none() {
                    self.ai_turn = Some(StreamingTurn::open(response_id));
                    self.ai_generation += 1;
                }
            }
            ServerEvent::OutputAudioStopped { .. } => {
                if let Some(processor) = self.caps.utterances.as_ref() {
                    processor.on_output_audio_stopped().await?;
                }
            }
            ServerEvent::UtteranceAdded { utterance, device_type, transcript_key } => {
                match self.caps.utterances.as_ref() {
                    Some(processor) => {
                        processor
                            .on_utterance_added(utterance, &device_type, transcript_key.as_deref())
                            .await?
                    }
                    None => warn!("utterance arrived with no processor wired"),
                }
            }
            ServerEvent::AssistantInterrupted { utterance_id } => {
                self.handle_interrupted(utterance_id);
            }
            ServerEvent::SearchKnowledgeStarted { query_original, query_en } => {
                self.search_started_at = Some(Instant::now());
                if let Some(panel) = self.caps.source_panel.as_ref() {
                    panel.search_started(&SearchQuery { query_original, query_en });
                }
            }
            ServerEvent::SearchKnowledgeResult { results, status, display_text } => {
                self.handle_search_result(results, status, display_text);
            }
            ServerEvent::CorrectionDetected { correction } => {
                if let Some(panel) = self.caps.corrections.as_ref() {
                    panel.correction_detected(correction);
                }
            }
            ServerEvent::CorrectionVerificationStarted { id } => {
                if let Some(panel) = self.caps.corrections.as_ref() {
                    panel.verification_started(&id);
                }
            }
            ServerEvent::CorrectionVerificationSucceeded { id, verification } => {
                if let Some(panel) = self.caps.corrections.as_ref() {
                    panel.verification_succeeded(&id, verification);
                }
            }
            ServerEvent::CorrectionVerificationFailed { id, reason } => {
                if let Some(panel) = self.caps.corrections.as_ref() {
                    panel.verification_failed(&id, reason);
                }
            }
            ServerEvent::Unknown => {
                trace!("ignoring unconsumed event kind");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Assistant turn streaming
    // =========================================================================

    /// A turn whose final text is awaiting the debounced bubble close must
    /// not absorb the next response. Close it now and go stale on the
    /// queued finalize, so the follow-up event opens a fresh turn with a
    /// fresh suppressor.
    fn rollover_finished_turn(&mut self) {
        if self.ai_turn.as_ref().is_some_and(|turn| turn.pending_final.is_some()) {
            self.ai_generation += 1;
            self.close_ai_bubble();
        }
    }

    fn handle_ai_delta(&mut self, turn_id: Option<String>, delta: &str) {
        self.rollover_finished_turn();
        let generation = &mut self.ai_generation;
        let turn = self.ai_turn.get_or_insert_with(|| {
            *generation += 1;
            StreamingTurn::open(turn_id)
        });
        turn.raw.push_str(delta);
        let visible = turn.suppressor.push(delta);
        if !visible.is_empty() {
            turn.visible.push_str(&visible);
            let completed = self.caps.display.append_delta(Speaker::Ai, &visible);
            for word in completed {
                turn.words.insert(normalize_word(&word));
                self.caps.display.display_word(DisplayWordEvent {
                    speaker: Speaker::Ai,
                    word,
                    skip_bubble: true,
                    key: None,
                });
            }
            self.citations.assign_streaming_citation_indexes(&turn.visible);
        }
    }

    fn handle_ai_done(&mut self, final_text: &str) {
        let gate = strip_tool_call_envelope(final_text);
        if gate.trim().is_empty() {
            // Tool-call-only turn: nothing to show. Retrieved sources and
            // pending search telemetry stay armed for the answer turn.
            debug!("assistant turn carried only tool-call JSON; suppressed");
            self.ai_turn = None;
            self.ai_generation += 1;
            return;
        }

        let outcome = self
            .citations
            .commit_final_transcript(&gate, self.pending_search.take());
        self.search_started_at = None;
        // Turns without retrieval leave the panel untouched.
        if outcome.panel.search.is_some() || !outcome.used_sources.is_empty() {
            if let Some(panel) = self.caps.source_panel.as_ref() {
                panel.panel_update(outcome.panel);
            }
        }

        let turn = self
            .ai_turn
            .get_or_insert_with(|| StreamingTurn::open(None));
        turn.pending_final = Some(outcome.remapped_transcript);
        self.schedule_finalize();
    }

    fn handle_interrupted(&mut self, utterance_id: String) {
        self.citations.reset_streaming();
        if let Some(turn) = self.ai_turn.as_mut() {
            // Re-tag so the partial bubble matches the persisted utterance.
            turn.id = utterance_id;
        }
        self.ai_generation += 1;
        self.close_ai_bubble();
    }

    /// Queue the debounced bubble close for the current turn.
    fn schedule_finalize(&mut self) {
        self.ai_generation += 1;
        let generation = self.ai_generation;
        let tx = self.self_tx.clone();
        let grace = self.finalize_grace;
        tokio::spawn(async move {
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            let _ = tx
                .send(CoordinatorInput::Finalize { speaker: Speaker::Ai, generation })
                .await;
        });
    }

    fn close_ai_bubble(&mut self) {
        let Some(turn) = self.ai_turn.take() else { return };
        let text = turn.pending_final.unwrap_or(turn.visible);
        if !text.trim().is_empty() {
            self.caps.display.push_final(Speaker::Ai, text);
        }
    }

    // =========================================================================
    // Word events and search results
    // =========================================================================

    fn handle_transcript_word(&mut self, word: String, speaker: Speaker, key: String) {
        if !self.seen_word_keys.insert(format!("{key}|{word}")) {
            trace!(%word, "dropping duplicate word event");
            return;
        }
        if speaker == Speaker::Ai {
            if let Some(turn) = self.ai_turn.as_ref() {
                if turn.words.contains(&normalize_word(&word)) {
                    // Already shown by the streaming bubble.
                    return;
                }
            }
        }
        self.caps.display.display_word(DisplayWordEvent {
            speaker,
            word,
            skip_bubble: false,
            key: Some(key),
        });
    }

    fn handle_search_result(
        &mut self,
        results: Vec<crate::core::citations::RetrievedSource>,
        status: Option<String>,
        display_text: Option<String>,
    ) {
        let duration_ms = self
            .search_started_at
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();
        self.pending_search = Some(SearchTelemetry {
            status: status.unwrap_or_else(|| "completed".to_string()),
            duration_ms,
            result_count: results.len(),
        });
        self.citations.register_retrieved_sources(results);

        // Pre-numbered citation text supplied by the tool goes straight to
        // display; it is trusted prose, never tool-call JSON.
        if let Some(text) = display_text {
            self.rollover_finished_turn();
            let mapped = self.citations.streaming_citation_text(&text);
            let generation = &mut self.ai_generation;
            let turn = self.ai_turn.get_or_insert_with(|| {
                *generation += 1;
                StreamingTurn::open(None)
            });
            turn.visible.push_str(&mapped);
            let completed = self.caps.display.append_delta(Speaker::Ai, &mapped);
            for word in completed {
                turn.words.insert(normalize_word(&word));
            }
        }
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

// =============================================================================
// Tests
// =============================================================================
