use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Nichelens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_MAX_CONCURRENCY: usize = 2;
pub const DEFAULT_QUICK_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_DEEP_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "nichelens=info,nichelens_lib=info,warn"
}

/// Service configuration, read once at process start.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Concurrency ceiling of the job scheduler (at least 1).
    pub max_concurrency: usize,
    pub quick_timeout: Duration,
    pub deep_timeout: Duration,
    /// Deadline of a single generation call.
    pub generation_timeout: Duration,
    pub tavily_api_key: Option<String>,
    pub tavily_base_url: String,
    pub ollama_base_url: String,
    pub model: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            quick_timeout: Duration::from_secs(DEFAULT_QUICK_TIMEOUT_SECS),
            deep_timeout: Duration::from_secs(DEFAULT_DEEP_TIMEOUT_SECS),
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            tavily_api_key: None,
            tavily_base_url: DEFAULT_TAVILY_BASE_URL.to_string(),
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    /// Invalid numeric values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str, default: u64| match text(key) {
            None => default,
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, default, "Invalid numeric setting, using default");
                default
            }),
        };

        let max_concurrency =
            number("NICHELENS_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY as u64).max(1) as usize;

        Self {
            max_concurrency,
            quick_timeout: Duration::from_secs(number(
                "NICHELENS_QUICK_TIMEOUT_SECS",
                DEFAULT_QUICK_TIMEOUT_SECS,
            )),
            deep_timeout: Duration::from_secs(number(
                "NICHELENS_DEEP_TIMEOUT_SECS",
                DEFAULT_DEEP_TIMEOUT_SECS,
            )),
            generation_timeout: Duration::from_secs(number(
                "NICHELENS_GENERATION_TIMEOUT_SECS",
                DEFAULT_GENERATION_TIMEOUT_SECS,
            )),
            tavily_api_key: text("TAVILY_API_KEY"),
            tavily_base_url: text("TAVILY_BASE_URL").unwrap_or(defaults.tavily_base_url),
            ollama_base_url: text("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
            model: text("NICHELENS_MODEL").unwrap_or(defaults.model),
        }
    }
}
