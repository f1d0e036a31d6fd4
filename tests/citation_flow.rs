//! Cross-turn citation numbering through the public API.

use std::collections::HashMap;
use std::sync::Arc;
use verba_realtime::core::citations::{
    CitationTurn, RetrievedSource, SearchTelemetry, SourceRecord, SourceRegistry,
};

fn wikipedia(title: &str, url: &str) -> SourceRecord {
    SourceRecord {
        title: title.to_string(),
        url: Some(url.to_string()),
        source: "wikipedia".to_string(),
        language: "es".to_string(),
    }
}

fn retrieved(index: u32, record: SourceRecord) -> RetrievedSource {
    RetrievedSource { citation_index: index, record }
}

#[test]
fn test_global_numbering_is_stable_across_turns() {
    let registry = Arc::new(SourceRegistry::new());

    // Turn 1: source A is cited and takes global index 1.
    let mut turn = CitationTurn::new(registry.clone());
    turn.register_retrieved_sources(vec![retrieved(1, wikipedia("A", "https://w/es/A"))]);
    let first = turn.commit_final_transcript("Según [1], sí.", None);
    assert_eq!(first.local_to_global, HashMap::from([(1, 1)]));

    // Turn 2: a later search returns A as local 1 and a new source B as
    // local 2. The final answer cites B first.
    let mut turn = CitationTurn::new(registry.clone());
    turn.register_retrieved_sources(vec![
        retrieved(1, wikipedia("A", "https://w/es/A")),
        retrieved(2, wikipedia("B", "https://w/es/B")),
    ]);
    turn.assign_streaming_citation_indexes("Primero [2]");
    let second = turn.commit_final_transcript("Primero [2], luego [1].", None);

    // A keeps global 1, B becomes global 2, regardless of citation order.
    assert_eq!(second.local_to_global, HashMap::from([(1, 1), (2, 2)]));
    assert_eq!(second.remapped_transcript, "Primero [2], luego [1].");

    // The used-source list follows global display order: A before B.
    let titles: Vec<&str> = second.used_sources.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["A", "B"]);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_display_text_gets_provisional_numbers_that_hold() {
    let registry = Arc::new(SourceRegistry::new());
    // An earlier turn already numbered one source.
    registry.get_or_create(&wikipedia("Viejo", "https://w/es/Viejo"));

    let mut turn = CitationTurn::new(registry);
    turn.register_retrieved_sources(vec![
        retrieved(1, wikipedia("Nuevo", "https://w/es/Nuevo")),
    ]);

    // The tool's pre-numbered display text references local 1; the user
    // must see the global number immediately.
    let shown = turn.streaming_citation_text("Encontré fuente 1 relevante.");
    assert_eq!(shown, "Encontré fuente 2 relevante.");

    // Commit keeps the provisional assignment.
    let outcome = turn.commit_final_transcript("Según fuente 1, claro.", None);
    assert_eq!(outcome.remapped_transcript, "Según fuente 2, claro.");
}

#[test]
fn test_telemetry_and_mixed_marker_forms() {
    let registry = Arc::new(SourceRegistry::new());
    let mut turn = CitationTurn::new(registry);
    turn.register_retrieved_sources(vec![
        retrieved(1, wikipedia("Uno", "https://w/es/Uno")),
        retrieved(2, wikipedia("Dos", "https://w/es/Dos")),
    ]);

    let telemetry = SearchTelemetry {
        status: "completed".to_string(),
        duration_ms: 250,
        result_count: 2,
    };
    let outcome = turn.commit_final_transcript(
        "Ver [1], también (2) y de nuevo source 1.",
        Some(telemetry.clone()),
    );

    assert_eq!(outcome.remapped_transcript, "Ver [1], también (2) y de nuevo source 1.");
    assert_eq!(outcome.panel.cited_count, 2);
    assert_eq!(outcome.panel.search, Some(telemetry));
}
