//! Data-channel protocol event types.
//!
//! All events are JSON objects tagged by a dotted `type` field, exchanged
//! over the session's data channel.
//!
//! Client events (sent to the endpoint):
//! - session.update - Session configuration
//! - conversation.item.create - Inject a user text item
//! - response.create - Request a model response
//!
//! Server events (received from the endpoint):
//! - response.audio_transcript.delta / response.text.delta - Streamed text
//! - response.audio_transcript.done / response.text.done - Final transcript
//! - conversation.item.input_audio_transcription.completed - User transcript
//! - transcript.word - Word-level transcript for turn-taking
//! - output_audio_buffer.started / .stopped - Assistant audio lifecycle
//! - utterance.added - Finalized utterance notification
//! - assistant.interrupted - User interrupted the assistant mid-answer
//! - tool.search_knowledge.started / .result - Retrieval tool lifecycle
//! - tool.log_correction.detected, correction.verification.* - Corrections

use serde::{Deserialize, Serialize};

use crate::core::citations::RetrievedSource;
use crate::core::types::{CorrectionRecord, Speaker, UtteranceRecord};

// =============================================================================
// Server events (inbound)
// =============================================================================

/// Inbound protocol events consumed by the event coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Streamed assistant transcript fragment (audio-transcript shape)
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Streamed assistant text fragment (plain-text shape)
    #[serde(rename = "response.text.delta")]
    TextDelta {
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Final assistant transcript (audio-transcript shape)
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        transcript: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Final assistant text (plain-text shape)
    #[serde(rename = "response.text.done")]
    TextDone {
        text: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Server finished transcribing a user audio item
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        transcript: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Word-level transcript event for turn-taking
    #[serde(rename = "transcript.word")]
    TranscriptWord {
        word: String,
        speaker: Speaker,
        /// Deterministic dedup key: `deviceType-speaker-transcriptText-timestamp`
        key: String,
    },

    /// Assistant began producing output audio; opens the assistant turn
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioStarted {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Assistant output audio drained
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioStopped {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// A finalized utterance is available
    #[serde(rename = "utterance.added")]
    UtteranceAdded {
        utterance: UtteranceRecord,
        device_type: String,
        #[serde(default)]
        transcript_key: Option<String>,
    },

    /// User interrupted the assistant while it was speaking
    #[serde(rename = "assistant.interrupted")]
    AssistantInterrupted { utterance_id: String },

    /// Knowledge search started
    #[serde(rename = "tool.search_knowledge.started")]
    SearchKnowledgeStarted {
        #[serde(default)]
        query_original: Option<String>,
        #[serde(default)]
        query_en: Option<String>,
    },

    /// Knowledge search finished with a result list
    #[serde(rename = "tool.search_knowledge.result")]
    SearchKnowledgeResult {
        #[serde(default)]
        results: Vec<RetrievedSource>,
        #[serde(default)]
        status: Option<String>,
        /// Streaming-safe citation text to display ahead of the narrative
        #[serde(default)]
        display_text: Option<String>,
    },

    /// The model flagged a correction
    #[serde(rename = "tool.log_correction.detected")]
    CorrectionDetected { correction: CorrectionRecord },

    /// Correction verification started
    #[serde(rename = "correction.verification.started")]
    CorrectionVerificationStarted { id: String },

    /// Correction verification confirmed
    #[serde(rename = "correction.verification.succeeded")]
    CorrectionVerificationSucceeded {
        id: String,
        #[serde(default)]
        verification: Option<serde_json::Value>,
    },

    /// Correction verification failed; terminal for the record
    #[serde(rename = "correction.verification.failed")]
    CorrectionVerificationFailed {
        id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Any event kind this client does not consume
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Client events (outbound)
// =============================================================================

/// Outbound protocol events. Every event carries a unique `event_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Session configuration, sent once per session
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: String,
        session: super::session::SessionConfig,
    },

    /// Inject a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        event_id: String,
        item: ConversationItem,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Request a model response
    #[serde(rename = "response.create")]
    ResponseCreate { event_id: String },
}

impl ClientEvent {
    /// A `conversation.item.create` carrying the user's text as input content.
    pub fn user_text_item(event_id: String, text: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            event_id,
            item: ConversationItem {
                item_type: "message".to_string(),
                role: Some("user".to_string()),
                content: Some(vec![ContentPart {
                    content_type: "input_text".to_string(),
                    text: Some(text.to_string()),
                }]),
            },
            previous_item_id: None,
        }
    }

    /// A bare `response.create`.
    pub fn response_create(event_id: String) -> Self {
        ClientEvent::ResponseCreate { event_id }
    }
}

/// Conversation item payload for `conversation.item.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
