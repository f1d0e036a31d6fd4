pub mod citations;
pub mod coordinator;
pub mod protocol;
pub mod transcription;
pub mod transport;
pub mod types;

// Re-export commonly used types for convenience
pub use citations::{
    CitationPhase, CitationTurn, CommitOutcome, RetrievedSource, SearchTelemetry, SourcePanelUpdate,
    SourceRecord, SourceRegistry, extract_citation_indices, remap_citation_markers,
};

pub use coordinator::{
    CoordinatorCapabilities, CoordinatorError, CoordinatorHandle, CoordinatorInput,
    CorrectionPanel, DisplaySink, DisplayWordEvent, RealtimeCoordinator, SearchQuery, SourcePanel,
    ToolCallSuppressor, UtteranceProcessor, strip_tool_call_envelope,
};

pub use protocol::{
    ChannelState, ClientEvent, EventChannel, OutboundMessageService, SendError, ServerEvent,
    SessionConfig, SessionOptions, build_session_update,
};

pub use transcription::{
    AudioManager, HttpWordTimingFetcher, TimingFetchError, TranscriptWordEvent,
    TranscriptionReconciler, UtteranceEvents, WordTimingFetcher,
};

pub use transport::{
    ConnectivityHooks, ConnectivityRestart, EstablishedSession, LocalAudioTrack, MediaSource,
    OpusTrackSource, RealtimeTransport, TransportConfig, TransportError,
};

pub use types::{CorrectionRecord, CorrectionStatus, Speaker, UtteranceRecord, WordTiming};
