//! Deterministic row scoring and ranking.
//!
//! `researchScore = 0.10 + 0.60·mentions' + 0.25·recency + 0.05·diversity`
//! where `mentions' = min(mentions, 6) / 6` and
//! `diversity = domainsCount / max(3, sourcesCount)`, every term clamped to [0, 1].

use std::collections::HashMap;

use super::types::{ClusterBundle, Row};

/// Mentions at or above this count saturate the mentions term.
pub const MENTIONS_CAP: f64 = 6.0;

const BASE_WEIGHT: f64 = 0.10;
const MENTIONS_WEIGHT: f64 = 0.60;
const RECENCY_WEIGHT: f64 = 0.25;
const DIVERSITY_WEIGHT: f64 = 0.05;

/// Clamp to [0, 1]; NaN maps to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn normalize(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    clamp_unit(value.max(0.0).min(cap) / cap)
}

/// Research score of `row`, a pure function of its counts and recency.
pub fn score(row: &Row) -> f64 {
    let mentions = normalize(f64::from(row.mentions), MENTIONS_CAP);
    let recency = clamp_unit(row.recency_score);
    let diversity = clamp_unit(f64::from(row.domains_count) / f64::from(row.sources_count.max(3)));

    let raw = BASE_WEIGHT
        + MENTIONS_WEIGHT * mentions
        + RECENCY_WEIGHT * recency
        + DIVERSITY_WEIGHT * diversity;
    round4(clamp_unit(raw))
}

/// Recompute scores, sort, and assign per-cluster ranks and cluster ids.
///
/// Sort order: score descending, then raw mentions descending, then input
/// order (stable sort). Ranks are 1-based and contiguous within a cluster.
pub fn rank_rows(mut rows: Vec<Row>) -> Vec<Row> {
    for row in rows.iter_mut() {
        row.recency_score = clamp_unit(row.recency_score);
        row.research_score = score(row);
        row.cluster_id = Some(cluster_slug(&row.cluster));
    }

    rows.sort_by(|a, b| {
        b.research_score
            .total_cmp(&a.research_score)
            .then_with(|| b.mentions.cmp(&a.mentions))
    });

    let mut positions: HashMap<String, u32> = HashMap::new();
    for row in rows.iter_mut() {
        let position = positions.entry(cluster_key(&row.cluster)).or_insert(0);
        *position += 1;
        row.rank = Some(*position);
    }

    rows
}

/// Order cluster bundles by their best-ranked member row and number them.
///
/// Clusters without member rows keep their relative order after the rest.
/// The result is truncated to `max_clusters`.
pub fn rank_clusters(
    mut clusters: Vec<ClusterBundle>,
    ranked_rows: &[Row],
    max_clusters: usize,
) -> Vec<ClusterBundle> {
    let mut first_position: HashMap<String, usize> = HashMap::new();
    for (position, row) in ranked_rows.iter().enumerate() {
        first_position.entry(cluster_key(&row.cluster)).or_insert(position);
    }

    // Merge bundles that share a label, keeping the first
    let mut seen = std::collections::HashSet::new();
    clusters.retain(|c| seen.insert(cluster_key(&c.cluster)));

    clusters.sort_by_key(|c| {
        first_position
            .get(&cluster_key(&c.cluster))
            .copied()
            .unwrap_or(usize::MAX)
    });
    clusters.truncate(max_clusters);
    for (i, cluster) in clusters.iter_mut().enumerate() {
        cluster.rank = i as u32 + 1;
    }
    clusters
}

/// Case- and whitespace-insensitive grouping key for a cluster label.
pub fn cluster_key(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// URL-safe identifier for a cluster label (`"Balloon Arches"` → `"balloon-arches"`).
pub fn cluster_slug(label: &str) -> String {
    let slug = label
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "general".to_string()
    } else {
        slug
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
