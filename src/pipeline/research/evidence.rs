//! Evidence selection: flatten provider documents, deduplicate by url, and
//! pick a domain-diverse subset under a total cap and a per-domain cap.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;

use super::types::{EvidenceItem, SearchDocument};

/// Maximum snippet length kept per evidence item (characters).
const MAX_SNIPPET_CHARS: usize = 400;

/// Registrable host of `url`, lowercased, without a leading `www.`.
/// Returns `None` for unparsable urls and non-http(s) schemes.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

/// Parse a provider publication date. Accepts RFC 3339, RFC 2822 and `YYYY-MM-DD`.
pub fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Flatten per-sub-query document batches into evidence items.
///
/// Documents with an unparsable url are discarded; the first occurrence of
/// a url wins.
pub fn flatten_documents(
    batches: Vec<(String, Vec<SearchDocument>)>,
    captured_at: DateTime<Utc>,
) -> Vec<EvidenceItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for (sub_query, documents) in batches {
        for doc in documents {
            let url = doc.url.trim().to_string();
            let domain = match domain_of(&url) {
                Some(d) => d,
                None => {
                    tracing::debug!(url = %doc.url, "Discarding search result with unparsable url");
                    continue;
                }
            };
            if !seen.insert(url.clone()) {
                continue;
            }
            items.push(EvidenceItem {
                title: doc.title.trim().to_string(),
                snippet: truncate_chars(doc.content.trim(), MAX_SNIPPET_CHARS),
                published_at: doc.published_at.as_deref().and_then(parse_published_at),
                domain,
                sub_query: sub_query.clone(),
                captured_at,
                url,
            });
        }
    }

    items
}

/// Select up to `total_cap` items, at most `per_domain_cap` per domain,
/// round-robin across domains in first-seen order.
///
/// Within a domain, items keep their input order. Deterministic for a
/// fixed input ordering.
pub fn select_evidence(
    items: &[EvidenceItem],
    total_cap: usize,
    per_domain_cap: usize,
) -> Vec<EvidenceItem> {
    if total_cap == 0 || per_domain_cap == 0 {
        return Vec::new();
    }

    // Group by domain, first-seen order, skipping duplicate urls
    let mut groups: Vec<Vec<&EvidenceItem>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut seen_urls: HashSet<&str> = HashSet::new();
    for item in items {
        if !seen_urls.insert(item.url.as_str()) {
            continue;
        }
        let slot = *index.entry(item.domain.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(item);
    }

    let mut taken = vec![0usize; groups.len()];
    let mut selected = Vec::with_capacity(total_cap.min(items.len()));

    'rounds: loop {
        let mut progressed = false;
        for (slot, group) in groups.iter().enumerate() {
            if selected.len() >= total_cap {
                break 'rounds;
            }
            if taken[slot] >= per_domain_cap || taken[slot] >= group.len() {
                continue;
            }
            selected.push(group[taken[slot]].clone());
            taken[slot] += 1;
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    selected
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> EvidenceItem {
        EvidenceItem {
            url: url.to_string(),
            title: format!("Title for {url}"),
            snippet: String::new(),
            published_at: None,
            domain: domain_of(url).unwrap(),
            sub_query: "q".into(),
            captured_at: Utc::now(),
        }
    }

    fn doc(url: &str) -> SearchDocument {
        SearchDocument {
            url: url.to_string(),
            title: " Some title ".into(),
            content: "content".into(),
            published_at: Some("2026-03-01".into()),
            score: Some(0.5),
        }
    }

    #[test]
    fn domain_strips_www_and_lowercases() {
        assert_eq!(domain_of("https://WWW.Etsy.com/listing/1").as_deref(), Some("etsy.com"));
        assert_eq!(domain_of("http://blog.example.org").as_deref(), Some("blog.example.org"));
    }

    #[test]
    fn domain_rejects_garbage_and_other_schemes() {
        assert!(domain_of("not a url").is_none());
        assert!(domain_of("ftp://files.example.com/a").is_none());
        assert!(domain_of("").is_none());
    }

    #[test]
    fn published_at_formats() {
        assert!(parse_published_at("2026-01-15T10:00:00Z").is_some());
        assert!(parse_published_at("Thu, 15 Jan 2026 10:00:00 +0000").is_some());
        assert!(parse_published_at("2026-01-15").is_some());
        assert!(parse_published_at("last week").is_none());
    }

    #[test]
    fn flatten_discards_bad_urls_and_duplicates() {
        let batches = vec![
            ("q1".to_string(), vec![doc("https://a.com/1"), doc("::bad::"), doc("https://b.com/1")]),
            ("q2".to_string(), vec![doc("https://a.com/1"), doc("https://c.com/1")]),
        ];
        let items = flatten_documents(batches, Utc::now());

        let urls: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.com/1", "https://b.com/1", "https://c.com/1"]);
        assert_eq!(items[0].sub_query, "q1");
        assert_eq!(items[2].sub_query, "q2");
        assert_eq!(items[0].title, "Some title");
        assert!(items[0].published_at.is_some());
    }

    #[test]
    fn selection_round_robins_across_domains() {
        let items = vec![
            item("https://a.com/1"),
            item("https://a.com/2"),
            item("https://a.com/3"),
            item("https://b.com/1"),
            item("https://c.com/1"),
            item("https://b.com/2"),
        ];
        let selected = select_evidence(&items, 5, 4);
        let urls: Vec<&str> = selected.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.com/1",
                "https://b.com/1",
                "https://c.com/1",
                "https://a.com/2",
                "https://b.com/2",
            ]
        );
    }

    #[test]
    fn selection_respects_per_domain_cap() {
        let items: Vec<EvidenceItem> = (0..10)
            .map(|i| item(&format!("https://big.com/{i}")))
            .chain(std::iter::once(item("https://small.com/1")))
            .collect();
        let selected = select_evidence(&items, 25, 4);
        assert_eq!(selected.len(), 5);
        assert_eq!(selected.iter().filter(|i| i.domain == "big.com").count(), 4);
    }

    #[test]
    fn zero_caps_select_nothing() {
        let items = vec![item("https://a.com/1")];
        assert!(select_evidence(&items, 0, 3).is_empty());
        assert!(select_evidence(&items, 3, 0).is_empty());
        assert!(select_evidence(&[], 3, 3).is_empty());
    }

    #[test]
    fn selection_bounds_hold_for_generated_inputs() {
        // Deterministic pseudo-random inputs over a handful of domains
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for case in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let len = (seed % 40) as usize;
            let items: Vec<EvidenceItem> = (0..len)
                .map(|i| {
                    let domain = (seed.rotate_left(i as u32) % 6) as usize;
                    item(&format!("https://d{domain}.com/{case}/{i}"))
                })
                .collect();
            let total_cap = (seed % 30) as usize;
            let per_domain = 1 + (seed % 5) as usize;

            let first = select_evidence(&items, total_cap, per_domain);
            let second = select_evidence(&items, total_cap, per_domain);

            assert!(first.len() <= total_cap);
            let mut per: HashMap<&str, usize> = HashMap::new();
            for selected in &first {
                *per.entry(selected.domain.as_str()).or_default() += 1;
            }
            assert!(per.values().all(|&n| n <= per_domain));
            assert_eq!(first, second, "selection must be deterministic");
        }
    }

    #[test]
    fn snippet_truncation_is_char_safe() {
        let text = "é".repeat(500);
        let truncated = truncate_chars(&text, MAX_SNIPPET_CHARS);
        assert_eq!(truncated.chars().count(), MAX_SNIPPET_CHARS + 3);
        assert!(truncated.ends_with("..."));
    }
}
