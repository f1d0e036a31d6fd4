//! Realtime voice-client transport and event reconciliation.
//!
//! This crate owns the client side of a speech-to-speech session: WebRTC
//! transport establishment, the JSON protocol spoken over the session's data
//! channel, and the single-threaded coordinator that reconciles streamed
//! transcripts, tool-call side effects, citations and user transcription
//! into coherent UI-facing events.

pub mod core;

// Re-export commonly used items for convenience
pub use crate::core::*;
