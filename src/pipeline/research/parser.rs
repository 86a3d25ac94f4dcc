//! Validation of generator output into `ResearchInsights`.
//!
//! The envelope is strict: the output must contain a JSON object with a
//! `rows` array. Inside it, individual rows and clusters are parsed
//! leniently: malformed entries are dropped and counted, never guessed at.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::evidence::domain_of;
use super::sanitize::{extract_json_object, sanitize_generation_output};
use super::types::*;

/// Label used when a row or cluster has no usable cluster name.
pub const DEFAULT_CLUSTER_LABEL: &str = "General";

/// Result of validating one generator response.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(ResearchInsights),
    Invalid(String),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Validate raw generator text.
pub fn validate_output(raw: &str) -> ValidationOutcome {
    let cleaned = sanitize_generation_output(raw);
    if cleaned.is_empty() {
        return ValidationOutcome::Invalid("empty output".into());
    }

    let json = match extract_json_object(&cleaned) {
        Some(j) => j,
        None => return ValidationOutcome::Invalid("no JSON object found".into()),
    };

    let root: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => return ValidationOutcome::Invalid(format!("malformed JSON: {e}")),
    };

    let envelope = match root {
        Value::Object(map) => map,
        _ => return ValidationOutcome::Invalid("top-level value is not an object".into()),
    };

    let raw_rows = match envelope.get("rows") {
        Some(Value::Array(rows)) => rows,
        Some(_) => return ValidationOutcome::Invalid("\"rows\" is not an array".into()),
        None => return ValidationOutcome::Invalid("missing \"rows\" array".into()),
    };

    let mut rows: Vec<Row> = raw_rows.iter().filter_map(parse_row).collect();
    let dropped_rows = raw_rows.len() - rows.len();
    if !raw_rows.is_empty() && rows.is_empty() {
        return ValidationOutcome::Invalid(format!(
            "all {} rows failed shape validation",
            raw_rows.len()
        ));
    }
    assign_unique_row_ids(&mut rows);

    let clusters = match envelope.get("clusters") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_cluster).collect(),
        _ => Vec::new(),
    };

    let result_bundle = match envelope
        .get("resultBundle")
        .or_else(|| envelope.get("result_bundle"))
    {
        Some(Value::Object(map)) => Some(parse_result_bundle(map)),
        _ => None,
    };

    if dropped_rows > 0 {
        tracing::debug!(dropped_rows, kept = rows.len(), "Dropped malformed rows");
    }

    ValidationOutcome::Valid(ResearchInsights {
        rows,
        clusters,
        result_bundle,
        dropped_rows,
    })
}

// ═══════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════

fn parse_row(value: &Value) -> Option<Row> {
    let map = value.as_object()?;

    let keyword = string_field(map, &["keyword"])?;
    let cluster = string_field(map, &["cluster", "clusterLabel", "cluster_label"])
        .unwrap_or_else(|| DEFAULT_CLUSTER_LABEL.to_string());
    let intent = string_field(map, &["intent"])
        .map(|s| Intent::parse_lenient(&s))
        .unwrap_or(Intent::Informational);

    let evidence = evidence_list(map.get("evidence"), MAX_ROW_EVIDENCE);
    let sources_count = count_field(map, &["sourcesCount", "sources_count"])
        .unwrap_or(evidence.len() as u32);
    let domains_count = count_field(map, &["domainsCount", "domains_count"]).unwrap_or_else(|| {
        evidence
            .iter()
            .filter_map(|e| domain_of(&e.url))
            .collect::<HashSet<_>>()
            .len() as u32
    });

    Some(Row {
        row_id: string_field(map, &["rowId", "row_id", "id"]).unwrap_or_default(),
        cluster,
        keyword,
        intent,
        mentions: count_field(map, &["mentions"]).unwrap_or(0),
        recency_score: number_field(map, &["recencyScore", "recency_score"]).unwrap_or(0.0),
        // Recomputed by the scorer; generator values are ignored
        research_score: 0.0,
        sources_count,
        domains_count,
        evidence,
        actions: action_list(map.get("actions"), usize::MAX),
        cluster_id: None,
        rank: None,
    })
}

/// Give every row a non-empty id, re-assigning blanks and duplicates.
fn assign_unique_row_ids(rows: &mut [Row]) {
    let mut seen = HashSet::new();
    let mut next = 1usize;
    for row in rows.iter_mut() {
        if row.row_id.is_empty() || !seen.insert(row.row_id.clone()) {
            loop {
                let candidate = format!("r{next}");
                next += 1;
                if seen.insert(candidate.clone()) {
                    row.row_id = candidate;
                    break;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════
// Clusters & Result Bundle
// ═══════════════════════════════════════════

fn parse_cluster(value: &Value) -> Option<ClusterBundle> {
    let map = value.as_object()?;
    let cluster = string_field(map, &["cluster", "label", "name"])?;

    let mut seen = HashSet::new();
    let keywords = match map.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|k| k.as_str())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
            .take(MAX_CLUSTER_KEYWORDS)
            .collect(),
        _ => Vec::new(),
    };

    Some(ClusterBundle {
        cluster,
        keywords,
        actions: action_list(map.get("actions"), MAX_CLUSTER_ACTIONS),
        evidence: evidence_list(map.get("evidence"), MAX_CLUSTER_EVIDENCE),
        rank: 0,
    })
}

fn parse_result_bundle(map: &Map<String, Value>) -> ResultBundle {
    let next_steps = match map.get("nextSteps").or_else(|| map.get("next_steps")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|s| s.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    ResultBundle {
        title: string_field(map, &["title"]).unwrap_or_default(),
        summary: string_field(map, &["summary"]).unwrap_or_default(),
        next_steps,
        sources: evidence_list(map.get("sources"), usize::MAX),
    }
}

// ═══════════════════════════════════════════
// Field helpers
// ═══════════════════════════════════════════

/// First non-blank string among `keys`, trimmed.
fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// First numeric value among `keys`; numeric strings are accepted.
fn number_field(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
}

/// Non-negative count; negatives clamp to 0, fractions round down.
fn count_field(map: &Map<String, Value>, keys: &[&str]) -> Option<u32> {
    number_field(map, keys).map(|n| n.max(0.0).min(u32::MAX as f64).floor() as u32)
}

/// Evidence references with both a url and a title; bare url strings are
/// accepted with the url doubling as title.
fn evidence_list(value: Option<&Value>, limit: usize) -> Vec<EvidenceRef> {
    let items = match value {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => {
                let url = string_field(map, &["url", "link"])?;
                let title = string_field(map, &["title", "name"])?;
                Some(EvidenceRef { url, title })
            }
            Value::String(url) if domain_of(url).is_some() => Some(EvidenceRef {
                url: url.trim().to_string(),
                title: url.trim().to_string(),
            }),
            _ => None,
        })
        .filter(|e| seen.insert(e.url.clone()))
        .take(limit)
        .collect()
}

fn action_list(value: Option<&Value>, limit: usize) -> Vec<ActionItem> {
    let items = match value {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(ActionItem {
                title: string_field(map, &["title", "action"])?,
                priority: string_field(map, &["priority"])
                    .map(|p| Priority::parse_lenient(&p))
                    .unwrap_or(Priority::P1),
            }),
            Value::String(title) if !title.trim().is_empty() => Some(ActionItem {
                title: title.trim().to_string(),
                priority: Priority::P1,
            }),
            _ => None,
        })
        .take(limit)
        .collect()
}
