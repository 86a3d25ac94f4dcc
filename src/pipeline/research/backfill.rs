//! Deterministic cluster synthesis from rows.
//!
//! Used when the generator under-delivers clusters. Same rows in, same
//! bundles out: grouping, ordering and selection depend only on row content
//! and input order.

use std::collections::{HashMap, HashSet};

use super::parser::DEFAULT_CLUSTER_LABEL;
use super::scoring::cluster_key;
use super::types::*;

struct Group<'a> {
    label: String,
    first_seen: usize,
    mentions: u64,
    rows: Vec<&'a Row>,
}

/// Build up to `max_clusters` cluster bundles from `rows`.
///
/// Groups are ordered by row count, then aggregate mentions, then the order
/// in which their label first appears. Ranks are 1-based.
pub fn backfill_clusters(rows: &[Row], max_clusters: usize) -> Vec<ClusterBundle> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();

    for row in rows {
        let label = match row.cluster.trim() {
            "" => DEFAULT_CLUSTER_LABEL,
            l => l,
        };
        let slot = *index.entry(cluster_key(label)).or_insert_with(|| {
            groups.push(Group {
                label: label.to_string(),
                first_seen: groups.len(),
                mentions: 0,
                rows: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.mentions += u64::from(row.mentions);
        group.rows.push(row);
    }

    groups.sort_by(|a, b| {
        b.rows
            .len()
            .cmp(&a.rows.len())
            .then_with(|| b.mentions.cmp(&a.mentions))
            .then_with(|| a.first_seen.cmp(&b.first_seen))
    });
    groups.truncate(max_clusters.min(MAX_CLUSTERS));

    groups
        .iter()
        .enumerate()
        .map(|(i, group)| synthesize(group, i as u32 + 1))
        .collect()
}

fn synthesize(group: &Group, rank: u32) -> ClusterBundle {
    let mut seen_keywords = HashSet::new();
    let keywords = group
        .rows
        .iter()
        .map(|r| r.keyword.trim())
        .filter(|k| !k.is_empty() && seen_keywords.insert(k.to_lowercase()))
        .take(MAX_CLUSTER_KEYWORDS)
        .map(str::to_string)
        .collect();

    let mut seen_actions = HashSet::new();
    let mut actions: Vec<ActionItem> = group
        .rows
        .iter()
        .flat_map(|r| r.actions.iter())
        .filter(|a| !a.title.trim().is_empty() && seen_actions.insert(a.title.trim().to_lowercase()))
        .take(MAX_CLUSTER_ACTIONS)
        .cloned()
        .collect();
    if actions.is_empty() {
        actions.push(ActionItem {
            title: format!("Create SEO content for {}", group.label),
            priority: Priority::P1,
        });
    }

    let mut seen_urls = HashSet::new();
    let evidence = group
        .rows
        .iter()
        .flat_map(|r| r.evidence.iter())
        .filter(|e| !e.url.trim().is_empty() && !e.title.trim().is_empty())
        .filter(|e| seen_urls.insert(e.url.clone()))
        .take(MAX_CLUSTER_EVIDENCE)
        .cloned()
        .collect();

    ClusterBundle {
        cluster: group.label.clone(),
        keywords,
        actions,
        evidence,
        rank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(keyword: &str, cluster: &str, mentions: u32) -> Row {
        Row {
            row_id: keyword.to_string(),
            cluster: cluster.to_string(),
            keyword: keyword.to_string(),
            intent: Intent::Buying,
            mentions,
            recency_score: 0.5,
            research_score: 0.0,
            sources_count: 1,
            domains_count: 1,
            evidence: vec![EvidenceRef {
                url: format!("https://{cluster}.example.com/{keyword}").replace(' ', "-"),
                title: format!("{keyword} source"),
            }],
            actions: vec![],
            cluster_id: None,
            rank: None,
        }
    }

    #[test]
    fn groups_ordered_by_count_then_mentions_then_first_seen() {
        let rows = vec![
            row("a1", "Arches", 1),
            row("b1", "Bunting", 5),
            row("c1", "Confetti", 1),
            row("a2", "arches", 1),
            row("d1", "Drapes", 5),
        ];
        let bundles = backfill_clusters(&rows, 7);
        let labels: Vec<(&str, u32)> = bundles.iter().map(|b| (b.cluster.as_str(), b.rank)).collect();
        // Arches: 2 rows. Bunting & Drapes tie on 1 row / 5 mentions, first-seen wins.
        assert_eq!(
            labels,
            vec![("Arches", 1), ("Bunting", 2), ("Drapes", 3), ("Confetti", 4)]
        );
    }

    #[test]
    fn blank_labels_group_as_general() {
        let rows = vec![row("x", "  ", 1), row("y", "", 1)];
        let bundles = backfill_clusters(&rows, 7);
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].cluster, DEFAULT_CLUSTER_LABEL);
        assert_eq!(bundles[0].keywords, vec!["x", "y"]);
    }

    #[test]
    fn respects_limits() {
        let rows: Vec<Row> = (0..12)
            .flat_map(|c| (0..8).map(move |k| row(&format!("kw{c}-{k}"), &format!("c{c}"), 1)))
            .collect();
        let bundles = backfill_clusters(&rows, 7);
        assert_eq!(bundles.len(), 7);
        for bundle in &bundles {
            assert_eq!(bundle.keywords.len(), MAX_CLUSTER_KEYWORDS);
            assert!(bundle.actions.len() <= MAX_CLUSTER_ACTIONS);
            assert_eq!(bundle.evidence.len(), MAX_CLUSTER_EVIDENCE);
        }
        assert_eq!(backfill_clusters(&rows, 3).len(), 3);
    }

    #[test]
    fn synthesizes_generic_action() {
        let bundles = backfill_clusters(&[row("arch kit", "Balloon Arches", 2)], 7);
        assert_eq!(
            bundles[0].actions,
            vec![ActionItem {
                title: "Create SEO content for Balloon Arches".into(),
                priority: Priority::P1,
            }]
        );
    }

    #[test]
    fn reuses_row_actions() {
        let mut first = row("arch kit", "Arches", 2);
        first.actions = vec![
            ActionItem { title: "List a starter kit".into(), priority: Priority::P0 },
            ActionItem { title: "list a starter kit".into(), priority: Priority::P2 },
        ];
        let mut second = row("arch stand", "Arches", 1);
        second.actions = vec![ActionItem { title: "Bundle pumps".into(), priority: Priority::P2 }];

        let bundles = backfill_clusters(&[first, second], 7);
        let titles: Vec<&str> = bundles[0].actions.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["List a starter kit", "Bundle pumps"]);
    }

    #[test]
    fn evidence_requires_url_and_title() {
        let mut r = row("arch kit", "Arches", 1);
        r.evidence.insert(0, EvidenceRef { url: "https://a.com".into(), title: " ".into() });
        let bundles = backfill_clusters(&[r], 7);
        assert_eq!(bundles[0].evidence.len(), 1);
        assert_eq!(bundles[0].evidence[0].title, "arch kit source");
    }

    #[test]
    fn empty_rows_yield_no_bundles() {
        assert!(backfill_clusters(&[], 7).is_empty());
    }

    #[test]
    fn output_is_byte_identical_across_calls() {
        let rows: Vec<Row> = (0..40)
            .map(|i| row(&format!("kw{i}"), &format!("Cluster {}", i % 9), i % 4))
            .collect();
        let first = serde_json::to_string(&backfill_clusters(&rows, 7)).unwrap();
        let second = serde_json::to_string(&backfill_clusters(&rows, 7)).unwrap();
        assert_eq!(first, second);
    }
}
