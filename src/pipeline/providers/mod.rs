//! External collaborators of the research pipeline.
//!
//! `tavily` and `ollama` are the HTTP implementations used by the binary;
//! `mock` holds scripted collaborators for tests and offline demos.

pub mod mock;
pub mod ollama;
pub mod tavily;

pub use mock::{MockSearchProvider, ScriptedGenerator};
pub use ollama::OllamaGenerator;
pub use tavily::TavilySearch;

use thiserror::Error;

use super::research::ResearchError;

/// Search provider failure, classified so the orchestrator can decide
/// whether a sub-query failure is skippable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Search provider not configured: {0}")]
    NotConfigured(String),

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Search provider returned a non-JSON body: {0}")]
    NonJson(String),

    #[error("Search provider blocked the request (HTTP {status}): {body}")]
    Blocked { status: u16, body: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generation provider not configured: {0}")]
    NotConfigured(String),

    #[error("Cannot reach generation server at {0}")]
    Connection(String),

    #[error("Generation server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse generation response: {0}")]
    ResponseParsing(String),
}

impl From<SearchError> for ResearchError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::NotConfigured(reason) => ResearchError::Configuration(reason),
            other => ResearchError::ProviderUnavailable {
                provider: "search",
                reason: other.to_string(),
            },
        }
    }
}

impl From<GenerationError> for ResearchError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::NotConfigured(reason) => ResearchError::Configuration(reason),
            other => ResearchError::ProviderUnavailable {
                provider: "generation",
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::research::ErrorKind;

    #[test]
    fn not_configured_is_fatal_configuration() {
        let err: ResearchError = SearchError::NotConfigured("TAVILY_API_KEY is not set".into()).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err: ResearchError = GenerationError::NotConfigured("no model".into()).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn transport_failures_are_provider_unavailable() {
        let err: ResearchError = SearchError::Blocked {
            status: 429,
            body: "rate limited".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert!(err.to_string().starts_with("search unavailable"));

        let err: ResearchError = GenerationError::Connection("http://localhost:11434".into()).into();
        assert!(err.to_string().starts_with("generation unavailable"));
    }
}
