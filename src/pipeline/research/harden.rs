//! Result-bundle hardening.
//!
//! Every finished run carries a `ResultBundle` with a non-empty title and
//! summary, whatever path produced it. Hardening is idempotent.

use std::collections::HashSet;

use super::types::*;

/// Summary used by every fallback result.
pub const FALLBACK_SUMMARY: &str =
    "Not enough reliable evidence was found to produce keyword insights for this request. \
     Try a broader query or run a deep search.";

/// Summary used when the generator omitted one on an otherwise valid result.
pub const DEFAULT_SUMMARY: &str =
    "Keyword opportunities ranked by mentions, recency and source diversity.";

const TITLE_PREFIX: &str = "Market research: ";
const MAX_TITLE_CHARS: usize = 80;

/// Next steps used when the generator supplied none.
pub const DEFAULT_NEXT_STEPS: [&str; 3] = [
    "Validate the top keywords with a keyword volume tool",
    "Review the cited sources for product and pricing signals",
    "Plan content for the highest-ranked cluster first",
];

/// Fill missing or blank fields of `bundle` with safe defaults and enforce
/// list limits. Sources fall back to row evidence, then to selected evidence.
pub fn harden_bundle(
    bundle: Option<ResultBundle>,
    input: &PipelineInput,
    evidence: &[EvidenceItem],
    rows: &[Row],
) -> ResultBundle {
    let bundle = bundle.unwrap_or_else(|| ResultBundle {
        title: String::new(),
        summary: String::new(),
        next_steps: Vec::new(),
        sources: Vec::new(),
    });

    let title = match bundle.title.trim() {
        "" => default_title(input),
        t => truncate_chars(t, MAX_TITLE_CHARS),
    };

    let summary = match bundle.summary.trim() {
        "" => DEFAULT_SUMMARY.to_string(),
        s => s.to_string(),
    };

    let mut next_steps: Vec<String> = bundle
        .next_steps
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if next_steps.is_empty() {
        next_steps = DEFAULT_NEXT_STEPS.iter().map(|s| s.to_string()).collect();
    }
    next_steps.truncate(MAX_NEXT_STEPS);

    let mut sources = dedupe_refs(
        bundle
            .sources
            .into_iter()
            .filter(|r| !r.url.trim().is_empty()),
    );
    if sources.is_empty() {
        sources = dedupe_refs(rows.iter().flat_map(|r| r.evidence.iter().cloned()));
    }
    if sources.is_empty() {
        sources = dedupe_refs(evidence.iter().map(EvidenceRef::from));
    }
    sources.truncate(MAX_SOURCES);

    ResultBundle {
        title,
        summary,
        next_steps,
        sources,
    }
}

/// Placeholder bundle for runs that produced no usable insights.
pub fn fallback_bundle(input: &PipelineInput, evidence: &[EvidenceItem]) -> ResultBundle {
    let sources = dedupe_refs(evidence.iter().map(EvidenceRef::from))
        .into_iter()
        .take(MAX_SOURCES)
        .collect();
    ResultBundle {
        title: default_title(input),
        summary: FALLBACK_SUMMARY.to_string(),
        next_steps: DEFAULT_NEXT_STEPS.iter().map(|s| s.to_string()).collect(),
        sources,
    }
}

fn default_title(input: &PipelineInput) -> String {
    let subject = match input.query.trim() {
        "" => input.topic.trim(),
        q => q,
    };
    truncate_chars(&format!("{TITLE_PREFIX}{subject}"), MAX_TITLE_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().trim_end().to_string()
}

fn dedupe_refs(refs: impl IntoIterator<Item = EvidenceRef>) -> Vec<EvidenceRef> {
    let mut seen = HashSet::new();
    refs.into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}
