//! Citation marker extraction and remapping.
//!
//! The model references retrieval sources inside its text using three
//! equivalent surface forms: bracketed (`[2]`), parenthesized (`(2)`) and
//! prose (`source 2`, `fuente #2`, case-insensitive). Extraction is a single
//! ordered pass over the text so numbering stays deterministic.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// One regex for all three marker forms. Group names:
/// `bn` bracketed, `pn` parenthesized, `w`/`sep`/`sn` prose.
static CITATION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[(?P<bn>\d+)\]|\((?P<pn>\d+)\)|\b(?P<w>source|fuente)(?P<sep>\s*#?\s*)(?P<sn>\d+)")
        .expect("citation marker regex")
});

/// Extract every local citation index referenced in `text`, in
/// first-encounter order, de-duplicated.
pub fn extract_citation_indices(text: &str) -> Vec<u32> {
    let mut seen = Vec::new();
    for caps in CITATION_MARKER.captures_iter(text) {
        let digits = caps
            .name("bn")
            .or_else(|| caps.name("pn"))
            .or_else(|| caps.name("sn"));
        let Some(digits) = digits else { continue };
        let Ok(index) = digits.as_str().parse::<u32>() else {
            continue;
        };
        if !seen.contains(&index) {
            seen.push(index);
        }
    }
    seen
}

/// Rewrite every citation marker in `text`, replacing local indices with
/// their mapped global display indices.
///
/// A marker whose index is absent from `map` is passed through verbatim;
/// an unregistered reference is graceful degradation, not an error.
pub fn remap_citation_markers(text: &str, map: &HashMap<u32, usize>) -> String {
    CITATION_MARKER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let lookup = |digits: &str| digits.parse::<u32>().ok().and_then(|n| map.get(&n).copied());
            if let Some(m) = caps.name("bn") {
                match lookup(m.as_str()) {
                    Some(global) => format!("[{global}]"),
                    None => caps[0].to_string(),
                }
            } else if let Some(m) = caps.name("pn") {
                match lookup(m.as_str()) {
                    Some(global) => format!("({global})"),
                    None => caps[0].to_string(),
                }
            } else if let Some(m) = caps.name("sn") {
                match lookup(m.as_str()) {
                    Some(global) => format!("{}{}{}", &caps["w"], &caps["sep"], global),
                    None => caps[0].to_string(),
                }
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_all_marker_forms() {
        let text = "See [1], then (2), then source 3 and Fuente #4.";
        assert_eq!(extract_citation_indices(text), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_extract_first_encounter_order_dedup() {
        let text = "First [3], then [1], then [3] again and fuente 1.";
        assert_eq!(extract_citation_indices(text), vec![3, 1]);
    }

    #[test]
    fn test_extract_prose_case_insensitive() {
        assert_eq!(extract_citation_indices("SOURCE 7 says so"), vec![7]);
        assert_eq!(extract_citation_indices("FUENTE #2 lo dice"), vec![2]);
    }

    #[test]
    fn test_extract_ignores_plain_numbers() {
        assert_eq!(extract_citation_indices("the year 1999 was fine"), Vec::<u32>::new());
    }

    #[test]
    fn test_remap_identity_is_noop() {
        let text = "Answer uses [2], (1) and fuente #2 today.";
        let map: HashMap<u32, usize> = [(1, 1), (2, 2)].into();
        assert_eq!(remap_citation_markers(text, &map), text);
    }

    #[test]
    fn test_remap_rewrites_all_forms() {
        let text = "Per [1] and (2), see source 1.";
        let map: HashMap<u32, usize> = [(1, 4), (2, 9)].into();
        assert_eq!(remap_citation_markers(text, &map), "Per [4] and (9), see source 4.");
    }

    #[test]
    fn test_remap_unmapped_marker_passes_through() {
        let text = "Known [1] and unknown [5].";
        let map: HashMap<u32, usize> = [(1, 3)].into();
        assert_eq!(remap_citation_markers(text, &map), "Known [3] and unknown [5].");
    }

    #[test]
    fn test_remap_preserves_prose_separator() {
        let map: HashMap<u32, usize> = [(2, 6)].into();
        assert_eq!(remap_citation_markers("see Fuente #2", &map), "see Fuente #6");
        assert_eq!(remap_citation_markers("see source  2", &map), "see source  6");
    }
}
