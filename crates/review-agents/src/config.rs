//! Runtime configuration.
//!
//! Precedence, highest first: CLI run options (applied in `main`), an optional
//! TOML file, environment variables, built-in defaults. Every numeric env var
//! falls back to its default when it does not parse.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use batching::chunker::ChunkPolicy;
use batching::tags::DEFAULT_MAX_TAG_LEN;
use serde::Deserialize;

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_CHUNK_TOKENS: &str = "OPENAI_CHUNK_TOKENS";
pub const ENV_MAX_REVIEW_CHARS: &str = "OPENAI_MAX_REVIEW_CHARS";
pub const ENV_MAX_REVIEWS_PER_PROJECT: &str = "OPENAI_MAX_REVIEWS_PER_PROJECT";
pub const ENV_TEMPERATURE: &str = "OPENAI_TEMPERATURE";
pub const ENV_TAG_BATCH_TOKENS: &str = "OPENAI_TAG_BATCH_TOKENS";
pub const ENV_TAG_BATCH_MAX_REVIEWS: &str = "OPENAI_TAG_BATCH_MAX_REVIEWS";
pub const ENV_TAG_TEMPERATURE: &str = "OPENAI_TAG_TEMPERATURE";

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TRANSPORT_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Chat-completions endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Required only when the HTTP backend is built.
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Extra attempts on transient HTTP failures.
    pub transport_retries: u32,
    /// Fixed delay between transport attempts.
    pub retry_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: env_string(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            api_key: env_string(ENV_API_KEY),
            model: env_string(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.into()),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// Project summary pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub chunk_tokens: usize,
    pub max_review_chars: usize,
    pub max_reviews_per_project: usize,
    pub temperature: f32,
    /// Reshape a lone chunk summary instead of calling the backend again.
    pub single_chunk_passthrough: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: env_or(ENV_CHUNK_TOKENS, 12_000),
            max_review_chars: env_or(ENV_MAX_REVIEW_CHARS, 1_200),
            max_reviews_per_project: env_or(ENV_MAX_REVIEWS_PER_PROJECT, 400),
            temperature: env_or(ENV_TEMPERATURE, 0.2),
            single_chunk_passthrough: false,
        }
    }
}

impl SummaryConfig {
    pub fn chunk_policy(&self) -> ChunkPolicy {
        ChunkPolicy {
            max_tokens: self.chunk_tokens,
            max_review_chars: self.max_review_chars,
        }
    }
}

/// Review tag pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub batch_tokens: usize,
    pub batch_max_reviews: usize,
    pub temperature: f32,
    pub max_tag_len: usize,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            batch_tokens: env_or(ENV_TAG_BATCH_TOKENS, 8_000),
            batch_max_reviews: env_or(ENV_TAG_BATCH_MAX_REVIEWS, 25),
            temperature: env_or(ENV_TAG_TEMPERATURE, 0.1),
            max_tag_len: DEFAULT_MAX_TAG_LEN,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub backend: BackendConfig,
    pub summary: SummaryConfig,
    pub tags: TagConfig,
}

fn check_temperature(name: &str, value: f32) -> Result<(), String> {
    if !(0.0..=2.0).contains(&value) {
        return Err(format!("{name} must be within [0, 2], got {value}"));
    }
    Ok(())
}

impl DigestConfig {
    /// Load from a TOML file. Missing sections and fields take env/default values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> Result<(), String> {
        if self.backend.model.trim().is_empty() {
            return Err("backend.model must not be empty".into());
        }
        if self.backend.base_url.trim().is_empty() {
            return Err("backend.base_url must not be empty".into());
        }
        if self.backend.timeout_secs == 0 {
            return Err("backend.timeout_secs must be greater than 0".into());
        }
        self.summary.chunk_policy().validate()?;
        if self.summary.max_reviews_per_project == 0 {
            return Err("summary.max_reviews_per_project must be greater than 0".into());
        }
        check_temperature("summary.temperature", self.summary.temperature)?;
        if self.tags.batch_tokens == 0 {
            return Err("tags.batch_tokens must be greater than 0".into());
        }
        if self.tags.batch_max_reviews == 0 {
            return Err("tags.batch_max_reviews must be greater than 0".into());
        }
        if self.tags.max_tag_len < 4 {
            return Err(format!(
                "tags.max_tag_len must be at least 4, got {}",
                self.tags.max_tag_len
            ));
        }
        check_temperature("tags.temperature", self.tags.temperature)?;
        Ok(())
    }
}

/// Inter-call delay from a `--sleep-s` value.
pub fn call_delay(sleep_s: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(sleep_s)
        .map_err(|e| format!("sleep must be a finite, non-negative number of seconds, got {sleep_s}: {e}"))
}
