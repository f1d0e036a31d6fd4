//! Shared domain types for the realtime client core.
//!
//! These are the hand-off types exchanged between the transport layer, the
//! event coordinator and the external collaborators (rendering, storage,
//! correction panel). They are deliberately plain data: persistence and
//! presentation live outside this crate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a turn or utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human user
    User,
    /// The assistant
    Ai,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Ai => write!(f, "ai"),
        }
    }
}

/// Word-level timing for a finalized utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    /// The word as transcribed
    pub word: String,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
}

/// A finalized spoken turn.
///
/// Created once transcription and audio are both available; immutable after
/// creation except for enrichment with word timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceRecord {
    /// Stable utterance id
    pub id: String,
    /// Who spoke
    pub speaker: Speaker,
    /// Final transcript text
    pub text: String,
    /// Captured audio, when the recording pipeline produced one.
    /// Not part of the wire representation.
    #[serde(skip)]
    pub audio: Option<Bytes>,
    /// Word-level timings, when enrichment succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_timings: Option<Vec<WordTiming>>,
}

impl UtteranceRecord {
    /// Create a record with no audio or timings attached yet.
    pub fn new(id: impl Into<String>, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            speaker,
            text: text.into(),
            audio: None,
            word_timings: None,
        }
    }
}

/// Lifecycle status of a detected correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionStatus {
    /// Correction detected by the model
    #[default]
    Detected,
    /// Verification in progress
    Verifying,
    /// Verification confirmed the correction
    Verified,
    /// Verification failed; terminal, never retried
    Failed,
}

/// A language correction surfaced by the model.
///
/// Lifecycle: created as `detected`, transitions to `verifying`, then to
/// exactly one of `verified` / `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    /// Stable correction id
    pub id: String,
    /// What the user said
    pub original: String,
    /// What the model suggests
    pub corrected: String,
    /// Kind of correction (grammar, vocabulary, ...)
    pub correction_type: String,
    /// Current lifecycle status
    #[serde(default)]
    pub status: CorrectionStatus,
    /// Verification payload, present once verification completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<serde_json::Value>,
}
