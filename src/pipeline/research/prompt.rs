use crate::pipeline_config::ModeProfile;

use super::types::{EvidenceItem, PipelineInput};

/// System prompt for keyword/cluster research generation.
pub const RESEARCH_SYSTEM_PROMPT: &str = r#"You are a market research analyst who finds trending product niches and search keywords.
Use ONLY the provided evidence. Output a single JSON object and nothing else.

SCHEMA:
{
  "rows": [
    {
      "rowId": "r1",
      "cluster": "short cluster label",
      "keyword": "search keyword",
      "intent": "buying|inspiration|diy|informational|supplier",
      "mentions": 0,
      "recencyScore": 0.0,
      "sourcesCount": 0,
      "domainsCount": 0,
      "evidence": [{"url": "...", "title": "..."}],
      "actions": [{"title": "...", "priority": "P0|P1|P2"}]
    }
  ],
  "clusters": [
    {
      "cluster": "short cluster label",
      "keywords": ["..."],
      "actions": [{"title": "...", "priority": "P0|P1|P2"}],
      "evidence": [{"url": "...", "title": "..."}]
    }
  ],
  "resultBundle": {
    "title": "...",
    "summary": "...",
    "nextSteps": ["..."],
    "sources": [{"url": "...", "title": "..."}]
  }
}

RULES:
- evidence urls MUST come from the EVIDENCE list
- mentions = number of evidence items mentioning the keyword
- recencyScore in [0,1], 1 = very recent
- at most 2 evidence entries per row, 5 keywords / 3 actions / 2 evidence per cluster
- no markdown, no commentary, no code fences"#;

/// Directive appended to the prompt when the previous output failed validation.
const REPAIR_DIRECTIVE: &str = "PREVIOUS OUTPUT WAS INVALID";

/// Directive appended when the output is below the mode floors.
const EXPANSION_DIRECTIVE: &str = "EXPANSION REQUIRED";

/// A fully assembled generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
}

impl GenerationRequest {
    /// Repair call: same body plus an invalid-output notice, no new evidence.
    pub fn repair(&self, reason: &str, temperature: f32) -> Self {
        Self {
            system_prompt: self.system_prompt.clone(),
            user_prompt: format!(
                "{}\n\n{REPAIR_DIRECTIVE}: {reason}\nReturn ONLY one valid JSON object that follows the SCHEMA exactly.",
                self.user_prompt
            ),
            temperature,
        }
    }

    /// Expansion call: same body plus current counts, the keywords already
    /// found and the floors to reach.
    pub fn expansion(
        &self,
        current_keywords: &[&str],
        current_clusters: usize,
        profile: &ModeProfile,
        temperature: f32,
    ) -> Self {
        Self {
            system_prompt: self.system_prompt.clone(),
            user_prompt: format!(
                "{body}\n\n{EXPANSION_DIRECTIVE}: the previous answer had {rows} rows across \
                 {current_clusters} clusters.\nCURRENT KEYWORDS: {keywords}\n\
                 Return a complete JSON object with at least {min_rows} rows across at least \
                 {min_clusters} clusters, keeping the current keywords and adding new ones.",
                body = self.user_prompt,
                rows = current_keywords.len(),
                keywords = current_keywords.join("; "),
                min_rows = profile.min_rows,
                min_clusters = profile.min_clusters,
            ),
            temperature,
        }
    }
}

/// Sub-queries dispatched to the search provider for `input`.
pub fn build_sub_queries(input: &PipelineInput, profile: &ModeProfile) -> Vec<String> {
    let base = input.query.trim().to_string();
    let mut queries = vec![base];
    if profile.sub_queries > 1 {
        queries.push(format!(
            "{} trending products {} market",
            input.topic.trim(),
            input.market.trim()
        ));
    }
    queries.truncate(profile.sub_queries.max(1));
    queries
}

/// Build the first generation call for a run.
pub fn build_generation_request(
    input: &PipelineInput,
    profile: &ModeProfile,
    evidence: &[EvidenceItem],
) -> GenerationRequest {
    let evidence_block = evidence
        .iter()
        .enumerate()
        .map(|(i, item)| format_evidence(i + 1, item))
        .collect::<Vec<_>>()
        .join("\n");

    let user_prompt = format!(
        "REQUEST: {query}\n\
         TOPIC: {topic}\n\
         MARKET: {market}\n\
         LANGUAGE: {language}\n\
         MODE: {mode}\n\n\
         MINIMUMS: at least {min_rows} rows across at least {min_clusters} clusters.\n\
         Write titles, summaries and actions in {language}.\n\n\
         <EVIDENCE>\n{evidence_block}\n</EVIDENCE>",
        query = input.query,
        topic = input.topic,
        market = input.market,
        language = input.language,
        mode = input.mode,
        min_rows = profile.min_rows,
        min_clusters = profile.min_clusters,
    );

    tracing::debug!(
        evidence = evidence.len(),
        prompt_chars = user_prompt.len(),
        "Assembled research prompt"
    );

    GenerationRequest {
        system_prompt: RESEARCH_SYSTEM_PROMPT.to_string(),
        user_prompt,
        temperature: profile.temperature,
    }
}

fn format_evidence(position: usize, item: &EvidenceItem) -> String {
    let published = item
        .published_at
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "[{position}] {title}\nURL: {url}\nDOMAIN: {domain} | PUBLISHED: {published}\n{snippet}",
        title = item.title,
        url = item.url,
        domain = item.domain,
        snippet = item.snippet,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::research::types::ResearchMode;
    use crate::pipeline_config::derive_profile;
    use chrono::Utc;

    fn input(mode: ResearchMode) -> PipelineInput {
        PipelineInput {
            query: "trending party decoration niches".into(),
            mode,
            market: "DE".into(),
            language: "de".into(),
            topic: "party decoration".into(),
        }
    }

    fn evidence() -> Vec<EvidenceItem> {
        vec![EvidenceItem {
            url: "https://shop.example.com/balloons".into(),
            title: "Balloon garland boom".into(),
            snippet: "Garlands are everywhere this season.".into(),
            published_at: None,
            domain: "shop.example.com".into(),
            sub_query: "q".into(),
            captured_at: Utc::now(),
        }]
    }

    #[test]
    fn quick_mode_uses_one_sub_query() {
        let profile = derive_profile(ResearchMode::Quick);
        let queries = build_sub_queries(&input(ResearchMode::Quick), &profile);
        assert_eq!(queries, vec!["trending party decoration niches".to_string()]);
    }

    #[test]
    fn deep_mode_adds_market_sub_query() {
        let profile = derive_profile(ResearchMode::Deep);
        let queries = build_sub_queries(&input(ResearchMode::Deep), &profile);
        assert_eq!(queries.len(), 2);
        assert!(queries[1].contains("party decoration"));
        assert!(queries[1].contains("DE"));
    }

    #[test]
    fn prompt_embeds_evidence_and_floors() {
        let profile = derive_profile(ResearchMode::Deep);
        let request = build_generation_request(&input(ResearchMode::Deep), &profile, &evidence());
        assert!(request.user_prompt.contains("[1] Balloon garland boom"));
        assert!(request.user_prompt.contains("URL: https://shop.example.com/balloons"));
        assert!(request.user_prompt.contains("PUBLISHED: unknown"));
        assert!(request.user_prompt.contains("at least 15 rows across at least 3 clusters"));
        assert_eq!(request.system_prompt, RESEARCH_SYSTEM_PROMPT);
        assert!((request.temperature - 0.15).abs() < f32::EPSILON);
    }

    #[test]
    fn repair_appends_directive_and_keeps_body() {
        let profile = derive_profile(ResearchMode::Quick);
        let request = build_generation_request(&input(ResearchMode::Quick), &profile, &evidence());
        let repair = request.repair("missing rows array", 0.0);
        assert!(repair.user_prompt.starts_with(&request.user_prompt));
        assert!(repair.user_prompt.contains("PREVIOUS OUTPUT WAS INVALID: missing rows array"));
        assert!(repair.temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn expansion_quotes_counts_and_floors() {
        let profile = derive_profile(ResearchMode::Deep);
        let request = build_generation_request(&input(ResearchMode::Deep), &profile, &evidence());
        let keywords: Vec<String> = (1..=10).map(|i| format!("keyword {i}")).collect();
        let current: Vec<&str> = keywords.iter().map(String::as_str).collect();
        let expansion = request.expansion(&current, 2, &profile, 0.0);
        assert!(expansion.user_prompt.starts_with(&request.user_prompt));
        assert!(expansion.user_prompt.contains("EXPANSION REQUIRED"));
        assert!(expansion.user_prompt.contains("10 rows across 2 clusters"));
        assert!(expansion
            .user_prompt
            .contains("CURRENT KEYWORDS: keyword 1; keyword 2; keyword 3"));
        assert!(expansion.user_prompt.contains("keyword 10"));
        assert!(expansion.user_prompt.contains("at least 15 rows"));
        // Evidence is not embedded a second time
        assert_eq!(expansion.user_prompt.matches("<EVIDENCE>").count(), 1);
    }
}
