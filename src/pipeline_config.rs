//! Pipeline configuration derived from research mode.
//!
//! Maps `ResearchMode` to concrete values: search breadth, evidence caps,
//! output floors and generation temperatures. These drive the whole
//! research pipeline behavior.

use serde::Serialize;

use crate::pipeline::research::types::{ResearchMode, SearchDepth, SearchParams, MAX_CLUSTERS};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Per-mode pipeline profile.
///
/// - Quick: one sub-query, small evidence set, lower floors
/// - Deep: two sub-queries, wider evidence set, expansion when under floor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeProfile {
    pub mode: ResearchMode,
    /// Number of search sub-queries dispatched concurrently.
    pub sub_queries: usize,
    /// Results requested per sub-query.
    pub max_results: u32,
    pub search_depth: SearchDepth,
    /// Evidence items kept after selection.
    pub total_evidence_cap: usize,
    /// Evidence items kept per domain.
    pub per_domain_cap: usize,
    /// Row floor the generator is asked to meet.
    pub min_rows: usize,
    /// Cluster floor; below it, clusters are backfilled from rows.
    pub min_clusters: usize,
    pub max_clusters: usize,
    /// Temperature of the first generation call.
    pub temperature: f32,
    /// Temperature of repair and expansion calls.
    pub retry_temperature: f32,
    /// Whether an expansion call is issued when rows stay under the floor.
    pub expansion_enabled: bool,
}

impl ModeProfile {
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            max_results: self.max_results,
            depth: self.search_depth,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Derivation
// ═══════════════════════════════════════════════════════════

pub fn derive_profile(mode: ResearchMode) -> ModeProfile {
    match mode {
        ResearchMode::Quick => ModeProfile {
            mode,
            sub_queries: 1,
            max_results: 5,
            search_depth: SearchDepth::Basic,
            total_evidence_cap: 10,
            per_domain_cap: 3,
            min_rows: 8,
            min_clusters: 2,
            max_clusters: MAX_CLUSTERS,
            temperature: 0.20,
            retry_temperature: 0.0,
            expansion_enabled: false,
        },
        ResearchMode::Deep => ModeProfile {
            mode,
            sub_queries: 2,
            max_results: 10,
            search_depth: SearchDepth::Advanced,
            total_evidence_cap: 25,
            per_domain_cap: 4,
            min_rows: 15,
            min_clusters: 3,
            max_clusters: MAX_CLUSTERS,
            temperature: 0.15,
            retry_temperature: 0.0,
            expansion_enabled: true,
        },
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_profile() {
        let profile = derive_profile(ResearchMode::Quick);
        assert_eq!(profile.sub_queries, 1);
        assert_eq!(profile.total_evidence_cap, 10);
        assert_eq!(profile.per_domain_cap, 3);
        assert_eq!(profile.min_rows, 8);
        assert_eq!(profile.min_clusters, 2);
        assert!((profile.temperature - 0.20).abs() < f32::EPSILON);
        assert!(!profile.expansion_enabled);
        assert_eq!(profile.search_params().depth, SearchDepth::Basic);
    }

    #[test]
    fn deep_profile() {
        let profile = derive_profile(ResearchMode::Deep);
        assert_eq!(profile.sub_queries, 2);
        assert_eq!(profile.total_evidence_cap, 25);
        assert_eq!(profile.per_domain_cap, 4);
        assert_eq!(profile.min_rows, 15);
        assert_eq!(profile.min_clusters, 3);
        assert!((profile.temperature - 0.15).abs() < f32::EPSILON);
        assert!(profile.retry_temperature.abs() < f32::EPSILON);
        assert!(profile.expansion_enabled);
        assert_eq!(profile.search_params().max_results, 10);
    }

    #[test]
    fn profile_serializes() {
        let json = serde_json::to_string(&derive_profile(ResearchMode::Deep)).unwrap();
        assert!(json.contains("\"mode\":\"deep\""));
        assert!(json.contains("\"search_depth\":\"advanced\""));
    }
}
