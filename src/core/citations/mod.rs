//! Citation state for retrieval-augmented answers.
//!
//! Two layers cooperate here:
//!
//! - [`SourceRegistry`] lives for the whole conversation and hands out
//!   **global display indices**: the stable citation numbers the user sees.
//!   A source identity gets exactly one index, the first time it is seen,
//!   and keeps it for the registry's lifetime.
//! - [`CitationTurn`] tracks exactly one in-flight answer turn: which local
//!   indices the model declared, which have been resolved to global indices
//!   so far, and the final local-to-global map produced at commit.
//!
//! Local indices are turn-scoped and may repeat across turns; they are never
//! used as global identifiers.

mod markers;

pub use markers::{extract_citation_indices, remap_citation_markers};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Source identity
// =============================================================================

/// A retrieval result as declared by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Human-readable title
    pub title: String,
    /// Canonical URL, when the source has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Originating corpus or provider name
    pub source: String,
    /// Language code of the source text
    pub language: String,
}

/// A source together with the local citation index the model assigned it
/// for the current turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedSource {
    /// Turn-scoped local index
    pub citation_index: u32,
    /// The source itself
    #[serde(flatten)]
    pub record: SourceRecord,
}

/// Derived deduplication key for a source.
///
/// Two records are the same source if their normalized URL and language
/// match, or, absent a URL, if normalized title, source and language match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SourceKey {
    Url { url: String, language: String },
    Titled { title: String, source: String, language: String },
}

impl SourceKey {
    fn of(record: &SourceRecord) -> Self {
        let language = normalize(&record.language);
        match record.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => SourceKey::Url {
                url: normalize(url).trim_end_matches('/').to_string(),
                language,
            },
            _ => SourceKey::Titled {
                title: normalize(&record.title),
                source: normalize(&record.source),
                language,
            },
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

// =============================================================================
// Source registry
// =============================================================================

/// Conversation-lifetime registry of sources and their global display
/// indices. Indices are 1-based and monotonically increasing.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    indexes: DashMap<SourceKey, usize>,
    records: RwLock<Vec<SourceRecord>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the global index for a source identity, assigning the next
    /// index if the identity has never been seen. Idempotent: the same
    /// identity always yields the same index.
    pub fn get_or_create(&self, record: &SourceRecord) -> usize {
        match self.indexes.entry(SourceKey::of(record)) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let mut records = self.records.write();
                records.push(record.clone());
                let index = records.len();
                entry.insert(index);
                debug!(index, title = %record.title, "assigned global citation index");
                index
            }
        }
    }

    /// The record behind a global display index, if assigned.
    pub fn record(&self, global_index: usize) -> Option<SourceRecord> {
        if global_index == 0 {
            return None;
        }
        self.records.read().get(global_index - 1).cloned()
    }

    /// Number of distinct source identities registered so far.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Per-turn citation state
// =============================================================================

/// Phase of the citation state machine for the active turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CitationPhase {
    /// No turn in flight
    #[default]
    Idle,
    /// Sources registered, no live assignments yet
    Retrieving,
    /// Citations being assigned against streamed partial text
    Streaming,
}

/// Telemetry for one knowledge search, published with the source panel
/// update at commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTelemetry {
    /// Terminal search status as reported by the tool
    pub status: String,
    /// Wall-clock duration of the search
    pub duration_ms: u64,
    /// Number of results returned
    pub result_count: usize,
}

/// Source-panel payload produced when a turn commits.
#[derive(Debug, Clone, Serialize)]
pub struct SourcePanelUpdate {
    /// Distinct sources cited in the final transcript
    pub cited_count: usize,
    /// Used sources, ordered by global display index
    pub used_sources: Vec<SourceRecord>,
    /// Search telemetry for the turn, when a search ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchTelemetry>,
}

/// Result of committing a turn's final transcript.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Final transcript with local markers rewritten to global indices
    pub remapped_transcript: String,
    /// Definitive local-to-global map for the committed turn
    pub local_to_global: HashMap<u32, usize>,
    /// Used sources, ordered by global display index, de-duplicated
    pub used_sources: Vec<SourceRecord>,
    /// Source-panel telemetry
    pub panel: SourcePanelUpdate,
}

/// Citation state for exactly one in-flight answer turn.
///
/// `idle -> retrieving -> streaming -> committed -> idle`; commit clears all
/// turn-scoped state, so the local-to-global map is empty both before a turn
/// starts and after it commits.
#[derive(Debug)]
pub struct CitationTurn {
    registry: Arc<SourceRegistry>,
    phase: CitationPhase,
    registered: HashMap<u32, SourceRecord>,
    local_to_global: HashMap<u32, usize>,
    pending_remap: Option<HashMap<u32, usize>>,
}

impl CitationTurn {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            phase: CitationPhase::Idle,
            registered: HashMap::new(),
            local_to_global: HashMap::new(),
            pending_remap: None,
        }
    }

    pub fn phase(&self) -> CitationPhase {
        self.phase
    }

    /// The live local-to-global map for the current turn.
    pub fn local_to_global(&self) -> &HashMap<u32, usize> {
        &self.local_to_global
    }

    /// Record the sources the model declared for the active turn. Assigns
    /// no global indices; that happens lazily when markers reference them.
    pub fn register_retrieved_sources(&mut self, sources: Vec<RetrievedSource>) {
        for source in sources {
            self.registered.insert(source.citation_index, source.record);
        }
        if !self.registered.is_empty() {
            self.phase = CitationPhase::Retrieving;
        }
    }

    /// Scan partial streamed text for citation markers and resolve any
    /// newly-referenced local index to a provisional global index, so the
    /// streaming UI can render a stable-looking number immediately.
    pub fn assign_streaming_citation_indexes(&mut self, partial_text: &str) {
        for local in extract_citation_indices(partial_text) {
            if self.local_to_global.contains_key(&local) {
                continue;
            }
            let Some(record) = self.registered.get(&local) else {
                // Unregistered reference; left unmapped on purpose.
                continue;
            };
            let global = self.registry.get_or_create(record);
            self.local_to_global.insert(local, global);
        }
        if !self.local_to_global.is_empty() {
            self.phase = CitationPhase::Streaming;
        }
    }

    /// Assign provisional indices for `raw` and return it with markers
    /// rewritten through the current map, ready to forward as a display
    /// delta ahead of the narrative text.
    pub fn streaming_citation_text(&mut self, raw: &str) -> String {
        self.assign_streaming_citation_indexes(raw);
        remap_citation_markers(raw, &self.local_to_global)
    }

    /// Commit the turn's final transcript: resolve every referenced local
    /// index through the registry (streaming assignments are preserved by
    /// construction), remap all markers, compute the used-source list and
    /// panel telemetry, stash the final map for bubble rendering, and clear
    /// the turn state back to idle.
    pub fn commit_final_transcript(
        &mut self,
        transcript: &str,
        search: Option<SearchTelemetry>,
    ) -> CommitOutcome {
        let mut map = HashMap::new();
        let mut used_globals: Vec<usize> = Vec::new();

        for local in extract_citation_indices(transcript) {
            let Some(record) = self.registered.get(&local) else {
                debug!(local, "citation references an unregistered source; leaving verbatim");
                continue;
            };
            let global = self.registry.get_or_create(record);
            map.insert(local, global);
            if !used_globals.contains(&global) {
                used_globals.push(global);
            }
        }

        // Panel order follows global display numbering.
        used_globals.sort_unstable();
        let used_sources: Vec<SourceRecord> = used_globals
            .iter()
            .filter_map(|&global| self.registry.record(global))
            .collect();

        let remapped_transcript = remap_citation_markers(transcript, &map);
        let panel = SourcePanelUpdate {
            cited_count: used_sources.len(),
            used_sources: used_sources.clone(),
            search,
        };

        self.pending_remap = Some(map.clone());
        self.registered.clear();
        self.local_to_global.clear();
        self.phase = CitationPhase::Idle;

        CommitOutcome {
            remapped_transcript,
            local_to_global: map,
            used_sources,
            panel,
        }
    }

    /// Drop in-flight streaming assignments (user interrupted the answer).
    /// Registered sources survive so a continuation can still cite them.
    pub fn reset_streaming(&mut self) {
        self.local_to_global.clear();
        if self.phase == CitationPhase::Streaming {
            self.phase = if self.registered.is_empty() {
                CitationPhase::Idle
            } else {
                CitationPhase::Retrieving
            };
        }
    }

    /// Take the final local-to-global map stashed by the last commit, for
    /// downstream bubble rendering.
    pub fn take_pending_remap(&mut self) -> Option<HashMap<u32, usize>> {
        self.pending_remap.take()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn source(title: &str, url: Option<&str>) -> SourceRecord {
        SourceRecord {
            title: title.to_string(),
            url: url.map(|u| u.to_string()),
            source: "wikipedia".to_string(),
            language: "es".to_string(),
        }
    }

    fn retrieved(index: u32, title: &str, url: Option<&str>) -> RetrievedSource {
        RetrievedSource {
            citation_index: index,
            record: source(title, url),
        }
    }

    #[test]
    fn test_registry_assigns_once_per_identity() {
        let registry = SourceRegistry::new();
        let a = source("A", Some("https://example.com/a"));
        let first = registry.get_or_create(&a);
        let second = registry.get_or_create(&a);
        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_identity_is_derived_not_literal() {
        let registry = SourceRegistry::new();
        let a = source("Madrid", Some("https://example.com/Madrid/"));
        let b = source("Madrid (city)", Some("  https://example.com/madrid"));
        assert_eq!(registry.get_or_create(&a), registry.get_or_create(&b));

        // Without a URL, identity falls back to title+source+language.
        let c = source("Comida", None);
        let d = source("  comida ", None);
        assert_eq!(registry.get_or_create(&c), registry.get_or_create(&d));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_indices_are_monotonic() {
        let registry = SourceRegistry::new();
        for n in 1..=5 {
            let idx = registry.get_or_create(&source(&format!("t{n}"), None));
            assert_eq!(idx, n as usize);
        }
    }

    #[test]
    fn test_same_identity_across_turns_is_idempotent() {
        let registry = Arc::new(SourceRegistry::new());
        let mut first_turn = CitationTurn::new(registry.clone());
        first_turn.register_retrieved_sources(vec![retrieved(1, "A", Some("https://a"))]);
        let first = first_turn.commit_final_transcript("see [1]", None);

        let mut second_turn = CitationTurn::new(registry);
        second_turn.register_retrieved_sources(vec![retrieved(4, "A", Some("https://a"))]);
        let second = second_turn.commit_final_transcript("again [4]", None);

        assert_eq!(first.local_to_global[&1], second.local_to_global[&4]);
    }

    #[test]
    fn test_commit_scenario_preserves_existing_global() {
        let registry = Arc::new(SourceRegistry::new());
        // A already holds global index 1 from an earlier turn.
        registry.get_or_create(&source("A", Some("https://a")));

        let mut turn = CitationTurn::new(registry);
        turn.register_retrieved_sources(vec![
            retrieved(1, "A", Some("https://a")),
            retrieved(2, "B", Some("https://b")),
        ]);
        let outcome = turn.commit_final_transcript("Answer uses [2] and [1].", None);

        assert_eq!(outcome.local_to_global[&1], 1);
        assert_eq!(outcome.local_to_global[&2], 2);
        assert_eq!(outcome.remapped_transcript, "Answer uses [2] and [1].");
        let titles: Vec<&str> = outcome.used_sources.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn test_duplicate_locals_collapse_to_one_global() {
        let registry = Arc::new(SourceRegistry::new());
        let mut turn = CitationTurn::new(registry);
        turn.register_retrieved_sources(vec![
            retrieved(1, "Same", Some("https://same")),
            retrieved(2, "Same again", Some("https://same")),
        ]);
        let outcome = turn.commit_final_transcript("both [1] and [2]", None);

        assert_eq!(outcome.local_to_global[&1], outcome.local_to_global[&2]);
        assert_eq!(outcome.used_sources.len(), 1);
        assert_eq!(outcome.panel.cited_count, 1);
    }

    #[test]
    fn test_streaming_assignment_survives_commit() {
        let registry = Arc::new(SourceRegistry::new());
        let mut turn = CitationTurn::new(registry);
        turn.register_retrieved_sources(vec![
            retrieved(1, "A", Some("https://a")),
            retrieved(2, "B", Some("https://b")),
        ]);

        // [2] is referenced first while streaming, so B takes global 1.
        turn.assign_streaming_citation_indexes("so far we have [2]");
        assert_eq!(turn.phase(), CitationPhase::Streaming);
        assert_eq!(turn.local_to_global()[&2], 1);

        let outcome = turn.commit_final_transcript("so far we have [2], plus [1]", None);
        assert_eq!(outcome.local_to_global[&2], 1);
        assert_eq!(outcome.local_to_global[&1], 2);
        assert_eq!(outcome.remapped_transcript, "so far we have [1], plus [2]");
    }

    #[test]
    fn test_unregistered_reference_left_unmapped() {
        let registry = Arc::new(SourceRegistry::new());
        let mut turn = CitationTurn::new(registry);
        turn.register_retrieved_sources(vec![retrieved(1, "A", Some("https://a"))]);
        let outcome = turn.commit_final_transcript("cites [1] and ghost [9]", None);

        assert_eq!(outcome.remapped_transcript, "cites [1] and ghost [9]");
        assert!(!outcome.local_to_global.contains_key(&9));
        assert_eq!(outcome.used_sources.len(), 1);
    }

    #[test]
    fn test_map_empty_before_and_after_turn() {
        let registry = Arc::new(SourceRegistry::new());
        let mut turn = CitationTurn::new(registry);
        assert!(turn.local_to_global().is_empty());

        turn.register_retrieved_sources(vec![retrieved(1, "A", Some("https://a"))]);
        turn.assign_streaming_citation_indexes("[1]");
        assert!(!turn.local_to_global().is_empty());

        let outcome = turn.commit_final_transcript("[1]", None);
        assert!(turn.local_to_global().is_empty());
        assert_eq!(turn.phase(), CitationPhase::Idle);
        assert_eq!(turn.take_pending_remap(), Some(outcome.local_to_global));
        assert_eq!(turn.take_pending_remap(), None);
    }

    #[test]
    fn test_reset_streaming_keeps_registered_sources() {
        let registry = Arc::new(SourceRegistry::new());
        let mut turn = CitationTurn::new(registry);
        turn.register_retrieved_sources(vec![retrieved(1, "A", Some("https://a"))]);
        turn.assign_streaming_citation_indexes("[1]");
        turn.reset_streaming();

        assert!(turn.local_to_global().is_empty());
        assert_eq!(turn.phase(), CitationPhase::Retrieving);
    }

    #[test]
    fn test_panel_telemetry_passthrough() {
        let registry = Arc::new(SourceRegistry::new());
        let mut turn = CitationTurn::new(registry);
        turn.register_retrieved_sources(vec![retrieved(1, "A", Some("https://a"))]);
        let telemetry = SearchTelemetry {
            status: "completed".to_string(),
            duration_ms: 120,
            result_count: 3,
        };
        let outcome = turn.commit_final_transcript("[1]", Some(telemetry.clone()));
        assert_eq!(outcome.panel.search, Some(telemetry));
        assert_eq!(outcome.panel.cited_count, 1);
    }
}
