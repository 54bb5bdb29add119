//! Pure helpers: query profiling, merging, reranking and quality scoring

use std::collections::HashSet;

use super::RagResult;
use crate::capability::RetrievedMatch;

const SIMPLE_LEADS: [&str; 4] = ["what is", "who is", "when", "where"];
const CONJUNCTIONS: [&str; 2] = ["and", "also"];

/// Cheap classification of a query's shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryProfile {
    pub is_simple_factual: bool,
    pub is_multi_part: bool,
}

impl QueryProfile {
    pub fn analyze(query: &str) -> Self {
        let lower = query.to_lowercase();
        let is_simple_factual = SIMPLE_LEADS.iter().any(|lead| lower.contains(lead));
        let has_conjunction = lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| CONJUNCTIONS.contains(&word));
        let is_multi_part = query.matches('?').count() > 1 || has_conjunction;
        Self {
            is_simple_factual,
            is_multi_part,
        }
    }
}

/// Merge two result lists, semantic first, dropping exact-duplicate content.
///
/// Each kept match is tagged with `source_type` in its metadata.
pub fn merge_results(
    semantic: Vec<RetrievedMatch>,
    keyword: Vec<RetrievedMatch>,
) -> Vec<RetrievedMatch> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(semantic.len() + keyword.len());
    let tagged = semantic
        .into_iter()
        .map(|m| (m, "semantic"))
        .chain(keyword.into_iter().map(|m| (m, "keyword")));

    for (mut m, source_type) in tagged {
        if seen.insert(m.content.clone()) {
            m.metadata
                .insert("source_type".to_string(), source_type.into());
            merged.push(m);
        }
    }
    merged
}

/// Order by ascending distance and keep the first `top_n`
pub fn rerank(mut results: Vec<RetrievedMatch>, top_n: usize) -> Vec<RetrievedMatch> {
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    results.truncate(top_n);
    results
}

/// Distinct sources of `results`, in order of first appearance
pub fn distinct_sources(results: &[RetrievedMatch]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for (i, r) in results.iter().enumerate() {
        let source = r
            .source()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Document {}", i + 1));
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

/// Append a `Sources:` line naming every distinct source
pub fn add_citations(text: &str, results: &[RetrievedMatch]) -> String {
    let sources = distinct_sources(results);
    if sources.is_empty() {
        text.to_string()
    } else {
        format!("{text}\n\nSources: {}", sources.join(", "))
    }
}

/// Heuristic answer quality in `[0, 1]`
pub fn quality_score(result: &RagResult) -> f32 {
    if result.error {
        return 0.0;
    }
    if result.text.chars().count() < 10 {
        return 0.3;
    }
    if result.text.contains("I couldn't find") || result.text.contains("Error") {
        return 0.4;
    }
    if !result.sources.is_empty() {
        return 0.9;
    }
    0.7
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Metadata;
    use crate::rag::Strategy;

    fn m(content: &str, source: &str, distance: f32) -> RetrievedMatch {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), source.into());
        RetrievedMatch {
            content: content.to_string(),
            metadata,
            distance,
        }
    }

    #[test]
    fn test_profile_simple_and_multi_part() {
        let simple = QueryProfile::analyze("What is the refund window?");
        assert!(simple.is_simple_factual);
        assert!(!simple.is_multi_part);

        let multi = QueryProfile::analyze("How do refunds work? How long do they take?");
        assert!(multi.is_multi_part);

        let conj = QueryProfile::analyze("Compare pricing and support");
        assert!(conj.is_multi_part);

        // "understand" contains "and" but is not a conjunction
        let plain = QueryProfile::analyze("Help me understand pricing");
        assert!(!plain.is_multi_part);
        assert!(!plain.is_simple_factual);
    }

    #[test]
    fn test_merge_dedups_fully_overlapping_sets() {
        let semantic = vec![m("a", "x", 0.2), m("b", "y", 0.4)];
        let keyword = vec![m("b", "y", 0.1), m("a", "x", 0.3)];
        let merged = merge_results(semantic, keyword);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].metadata["source_type"], "semantic");
        assert_eq!(merged[1].metadata["source_type"], "semantic");
    }

    #[test]
    fn test_merge_keeps_unique_keyword_hits() {
        let merged = merge_results(vec![m("a", "x", 0.2)], vec![m("a", "x", 0.2), m("c", "z", 0.5)]);
        let contents: Vec<_> = merged.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "c"]);
        assert_eq!(merged[1].metadata["source_type"], "keyword");
    }

    #[test]
    fn test_rerank_orders_by_distance_and_truncates() {
        let ranked = rerank(
            vec![m("far", "a", 0.9), m("near", "b", 0.1), m("mid", "c", 0.5), m("x", "d", 0.7)],
            3,
        );
        let contents: Vec<_> = ranked.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["near", "mid", "x"]);
    }

    #[test]
    fn test_citations_dedup_sources() {
        let results = vec![m("a", "policy.md", 0.1), m("b", "policy.md", 0.2), m("c", "faq.md", 0.3)];
        assert_eq!(
            add_citations("Answer", &results),
            "Answer\n\nSources: policy.md, faq.md"
        );
        assert_eq!(add_citations("Answer", &[]), "Answer");
    }

    #[test]
    fn test_quality_score_ladder() {
        let mut r = RagResult::no_documents(Strategy::Basic);
        assert_eq!(quality_score(&r), 0.4);

        r.text = "short".into();
        assert_eq!(quality_score(&r), 0.3);

        r.text = "A long enough answer without citations".into();
        assert_eq!(quality_score(&r), 0.7);

        r.sources = vec!["doc.md".into()];
        assert_eq!(quality_score(&r), 0.9);

        r.error = true;
        assert_eq!(quality_score(&r), 0.0);
    }
}
