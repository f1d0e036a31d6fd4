//! User transcription reconciliation.
//!
//! The transcription endpoint finalizes user audio asynchronously, so the
//! transcript for a push-to-talk capture can arrive before or after the
//! recording pipeline hands over the captured audio. The reconciler joins the
//! two: it holds at most one pending capture (either a ready record or a
//! promise of one), and when the server's transcript arrives it enriches the
//! capture, fetches word timings, and emits exactly one finalized utterance.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::types::{Speaker, UtteranceRecord, WordTiming};

// =============================================================================
// Collaborator seams
// =============================================================================

/// Supplies the most recent captured audio when a fallback record has to be
/// synthesized.
pub trait AudioManager: Send + Sync {
    fn take_current_audio(&self) -> Option<Bytes>;
}

/// Word-timing fetch failed; the utterance is still emitted without timings.
#[derive(Debug, Error)]
pub enum TimingFetchError {
    #[error("timing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("timing response malformed: {0}")]
    Payload(String),
}

/// Fetches word-level timings for a finalized capture.
#[async_trait]
pub trait WordTimingFetcher: Send + Sync {
    async fn fetch_word_timings(
        &self,
        audio: &[u8],
        transcript: &str,
    ) -> Result<Vec<WordTiming>, TimingFetchError>;
}

/// Word-level event emitted ahead of the finalized utterance so turn-taking
/// consumers see words without waiting for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptWordEvent {
    pub speaker: Speaker,
    pub word: String,
    /// Shared dedup key; every word of one utterance carries the same key
    pub key: String,
}

/// Downstream consumer of reconciled utterances.
pub trait UtteranceEvents: Send + Sync {
    fn transcript_word(&self, event: TranscriptWordEvent);
    fn utterance_added(&self, utterance: UtteranceRecord, device_type: &str, transcript_key: &str);
}

// =============================================================================
// HTTP timing fetcher
// =============================================================================

#[derive(Debug, Deserialize)]
struct TimingResponse {
    words: Vec<WordTiming>,
}

/// Fetches word timings from an alignment endpoint via multipart upload.
pub struct HttpWordTimingFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpWordTimingFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl WordTimingFetcher for HttpWordTimingFetcher {
    async fn fetch_word_timings(
        &self,
        audio: &[u8],
        transcript: &str,
    ) -> Result<Vec<WordTiming>, TimingFetchError> {
        let form = reqwest::multipart::Form::new()
            .part(
                "audio",
                reqwest::multipart::Part::bytes(audio.to_vec()).file_name("capture.wav"),
            )
            .text("transcript", transcript.to_string());

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        let parsed: TimingResponse = response
            .json()
            .await
            .map_err(|e| TimingFetchError::Payload(e.to_string()))?;
        Ok(parsed.words)
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Joins server transcripts with locally captured audio.
///
/// Holds at most one pending capture. `set_pending` installs a ready record;
/// `set_pending_future` installs a promise for a capture still being
/// finalized by the recording pipeline. A transcript consumes whichever is
/// present, preferring the ready record.
pub struct TranscriptionReconciler {
    media: Arc<dyn AudioManager>,
    timings: Arc<dyn WordTimingFetcher>,
    events: Arc<dyn UtteranceEvents>,
    device_type: String,
    pending: Option<UtteranceRecord>,
    pending_rx: Option<oneshot::Receiver<Option<UtteranceRecord>>>,
}

impl TranscriptionReconciler {
    pub fn new(
        media: Arc<dyn AudioManager>,
        timings: Arc<dyn WordTimingFetcher>,
        events: Arc<dyn UtteranceEvents>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            media,
            timings,
            events,
            device_type: device_type.into(),
            pending: None,
            pending_rx: None,
        }
    }

    /// Install a ready capture awaiting its transcript.
    pub fn set_pending(&mut self, record: UtteranceRecord) {
        if self.pending.is_some() {
            warn!("replacing an unconsumed pending capture");
        }
        self.pending = Some(record);
    }

    /// Install a promise for a capture still being finalized.
    pub fn set_pending_future(&mut self, rx: oneshot::Receiver<Option<UtteranceRecord>>) {
        if self.pending_rx.is_some() {
            warn!("replacing an unconsumed pending capture promise");
        }
        self.pending_rx = Some(rx);
    }

    /// Reconcile a completed server transcript with the pending capture.
    ///
    /// Emits per-word `transcript_word` events followed by exactly one
    /// `utterance_added`, then clears both pending slots. When no capture is
    /// available a minimal record is synthesized from whatever audio the
    /// manager still holds; the turn is never dropped.
    pub async fn handle_transcription_completed(&mut self, transcript: &str) {
        let mut record = match self.take_capture().await {
            Some(record) => record,
            None => {
                warn!("transcript arrived with no pending capture; synthesizing record");
                let mut record =
                    UtteranceRecord::new(Uuid::new_v4().to_string(), Speaker::User, transcript);
                record.audio = self.media.take_current_audio();
                record
            }
        };
        record.text = transcript.to_string();

        if let Some(audio) = record.audio.as_ref() {
            match self.timings.fetch_word_timings(audio, transcript).await {
                Ok(words) => record.word_timings = Some(words),
                Err(e) => {
                    // Timings are an enhancement; the utterance still goes out.
                    warn!(error = %e, "word timing fetch failed");
                }
            }
        }

        let key = self.transcript_key(&record);
        for word in record.text.split_whitespace() {
            self.events.transcript_word(TranscriptWordEvent {
                speaker: record.speaker,
                word: word.to_string(),
                key: key.clone(),
            });
        }
        debug!(id = %record.id, key = %key, "user utterance reconciled");
        self.events.utterance_added(record, &self.device_type, &key);
    }

    async fn take_capture(&mut self) -> Option<UtteranceRecord> {
        if let Some(record) = self.pending.take() {
            self.pending_rx = None;
            return Some(record);
        }
        if let Some(rx) = self.pending_rx.take() {
            match rx.await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => warn!("capture promise resolved empty"),
                Err(_) => warn!("capture promise dropped before resolving"),
            }
        }
        None
    }

    fn transcript_key(&self, record: &UtteranceRecord) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("{}-{}-{}-{}", self.device_type, record.speaker, record.text, millis)
    }
}

// =============================================================================
// Tests
// =============================================================================
