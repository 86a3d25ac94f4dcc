//! Scripted collaborators for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;

use super::{GenerationError, SearchError};
use crate::pipeline::research::{GenerationClient, SearchDocument, SearchParams, SearchProvider};

// ═══════════════════════════════════════════
// Search
// ═══════════════════════════════════════════

/// Search provider returning canned documents, optionally per query.
pub struct MockSearchProvider {
    default: Result<Vec<SearchDocument>, SearchError>,
    by_query: HashMap<String, Result<Vec<SearchDocument>, SearchError>>,
    queries: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new(documents: Vec<SearchDocument>) -> Self {
        Self {
            default: Ok(documents),
            by_query: HashMap::new(),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every query succeeds with no documents.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Every query fails with `error`.
    pub fn failing(error: SearchError) -> Self {
        Self {
            default: Err(error),
            by_query: HashMap::new(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_query(
        mut self,
        query: &str,
        result: Result<Vec<SearchDocument>, SearchError>,
    ) -> Self {
        self.by_query.insert(query.to_string(), result);
        self
    }

    /// Queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(
        &self,
        query: &str,
        _params: &SearchParams,
    ) -> Result<Vec<SearchDocument>, SearchError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        self.by_query
            .get(query)
            .unwrap_or(&self.default)
            .clone()
    }
}

// ═══════════════════════════════════════════
// Generation
// ═══════════════════════════════════════════

/// One recorded generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
}

/// Generator that replays a script of responses in order.
///
/// Once the script is exhausted, `fallback` is returned. An optional gate
/// holds every call until a permit is released, and an optional delay
/// slows every call down.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: Result<String, GenerationError>,
    calls: Mutex<Vec<RecordedCall>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Err(GenerationError::ResponseParsing("script exhausted".into())),
            calls: Mutex::new(Vec::new()),
            gate: None,
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always answer with `response`.
    pub fn always(response: &str) -> Self {
        Self::new(Vec::new()).with_fallback(Ok(response.to_string()))
    }

    pub fn with_fallback(mut self, fallback: Result<String, GenerationError>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Hold each call until a permit is added to `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter when a call ends or is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                user_prompt: user_prompt.to_string(),
                temperature,
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

// ═══════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════

/// `count` search documents spread round-robin over `domains` domains.
pub fn sample_documents(count: usize, domains: usize) -> Vec<SearchDocument> {
    let domains = domains.max(1);
    (0..count)
        .map(|i| SearchDocument {
            url: format!("https://shop{}.example.com/post-{i}", i % domains),
            title: format!("Party decoration trend #{i}"),
            content: format!("Balloon garlands and themed tableware keep trending (item {i})."),
            published_at: Some("2025-05-01".to_string()),
            score: Some(0.5),
        })
        .collect()
}

/// A valid generator response with `rows` rows spread over `clusters`
/// clusters, plus one cluster bundle per cluster.
pub fn insights_json(rows: usize, clusters: usize) -> String {
    let clusters = clusters.max(1);
    let row_values: Vec<_> = (0..rows)
        .map(|i| {
            json!({
                "rowId": format!("r{}", i + 1),
                "cluster": format!("Cluster {}", i % clusters + 1),
                "keyword": format!("keyword {}", i + 1),
                "intent": "buying",
                "mentions": (i % 6) + 1,
                "recencyScore": 0.5,
                "sourcesCount": 2,
                "domainsCount": 2,
                "evidence": [{
                    "url": format!("https://shop{}.example.com/post-{i}", i % 3),
                    "title": format!("Evidence {i}"),
                }],
            })
        })
        .collect();
    let cluster_values: Vec<_> = (0..clusters.min(rows.max(1)))
        .map(|c| {
            json!({
                "cluster": format!("Cluster {}", c + 1),
                "keywords": [format!("keyword {}", c + 1)],
                "actions": [{"title": format!("Stock cluster {} products", c + 1), "priority": "P1"}],
                "evidence": [],
            })
        })
        .collect();

    json!({
        "rows": row_values,
        "clusters": cluster_values,
        "resultBundle": {
            "title": "Party decoration niches",
            "summary": "Garlands and themed tableware lead the market.",
            "nextSteps": ["Validate keyword volumes"],
            "sources": [],
        },
    })
    .to_string()
}
