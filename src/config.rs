//! Configuration loader and validator for the crawler.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::backoff::{CooldownPolicy, RetryPolicy};
use crate::pixiv::PIXIV_BASE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub pixiv: PixivSettings,
    pub database: DatabaseSettings,
    pub crawl: CrawlSettings,
    pub ingest: IngestSettings,
}

/// Access to the pixiv ajax API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PixivSettings {
    /// Value of the `PHPSESSID` cookie; empty means anonymous.
    pub token: String,
    pub proxy: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub lang: String,
}

impl Default for PixivSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            proxy: None,
            base_url: PIXIV_BASE.to_string(),
            timeout_secs: 10,
            lang: "zh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/pixiv.db".to_string(),
        }
    }
}

/// Page crawl loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CrawlSettings {
    /// Attempts per page (fetch + enrich) before the page is skipped.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// A probed last page at or above this aborts the crawl.
    pub page_cap: u32,
    pub cooldown_every: u32,
    pub cooldown_min_remaining: u32,
    pub cooldown_secs: u64,
    /// Upper bound on concurrent metadata requests per page.
    pub meta_concurrency: usize,
    /// Ingest the enriched part of a page when some metadata fetches fail.
    pub allow_partial_pages: bool,
    /// Spend the retry budget on API error payloads and non-retryable statuses too.
    pub retry_api_errors: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay_secs: 20,
            page_cap: 1000,
            cooldown_every: 90,
            cooldown_min_remaining: 50,
            cooldown_secs: 30,
            meta_concurrency: 8,
            allow_partial_pages: false,
            retry_api_errors: true,
        }
    }
}

impl CrawlSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            every: self.cooldown_every,
            min_remaining: self.cooldown_min_remaining,
            pause: Duration::from_secs(self.cooldown_secs),
        }
    }
}

/// Batch persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestSettings {
    pub batch_size: usize,
    /// Retries of a failed flush, on top of the first attempt.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl IngestSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries.saturating_add(1),
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

impl Config {
    /// Override file values with `PHPSESSID`, `PROXY` and `DATABASE_URL` when set.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("PHPSESSID") {
            self.pixiv.token = token;
        }
        if let Ok(proxy) = std::env::var("PROXY") {
            self.pixiv.proxy = Some(proxy).filter(|p| !p.trim().is_empty());
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.pixiv.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("pixiv.base_url must be non-empty"));
    }
    if cfg.pixiv.timeout_secs == 0 {
        return Err(ConfigError::Invalid("pixiv.timeout_secs must be > 0"));
    }

    if cfg.database.url.trim().is_empty() {
        return Err(ConfigError::Invalid("database.url must be non-empty"));
    }

    if cfg.crawl.max_retries == 0 {
        return Err(ConfigError::Invalid("crawl.max_retries must be > 0"));
    }
    if cfg.crawl.page_cap == 0 {
        return Err(ConfigError::Invalid("crawl.page_cap must be > 0"));
    }
    if cfg.crawl.cooldown_every == 0 {
        return Err(ConfigError::Invalid("crawl.cooldown_every must be > 0"));
    }
    if cfg.crawl.meta_concurrency == 0 {
        return Err(ConfigError::Invalid("crawl.meta_concurrency must be > 0"));
    }

    if cfg.ingest.batch_size == 0 {
        return Err(ConfigError::Invalid("ingest.batch_size must be > 0"));
    }
    // ingest.max_retries may be 0: a failed flush is then dropped at once.

    Ok(())
}

/// Returns the documented example YAML content.
pub fn example() -> &'static str {
    r#"pixiv:
  token: "YOUR_PHPSESSID"
  proxy: "http://127.0.0.1:10808"
  base_url: "https://www.pixiv.net/"
  timeout_secs: 10
  lang: "zh"

database:
  url: "sqlite://./data/pixiv.db"

crawl:
  max_retries: 10
  retry_delay_secs: 20
  page_cap: 1000
  cooldown_every: 90
  cooldown_min_remaining: 50
  cooldown_secs: 30
  meta_concurrency: 8
  allow_partial_pages: false
  retry_api_errors: true

ingest:
  batch_size: 100
  max_retries: 3
  retry_delay_ms: 1000
"#
}
