use std::env;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default source cluster.
pub const DEFAULT_IN_HOST: &str = "http://localhost:9200";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Rollup run ────────────────────────────────────────────────

/// What to read, where to write it, and how hard to push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Regex matched against source index names.
    pub in_filter: String,
    /// Date layout (strftime) decoding a date out of a source index name.
    pub in_pattern: String,
    /// Date layout (strftime) rendering the destination index name.
    pub out_pattern: String,
    pub in_host: String,
    /// Destination cluster. Falls back to `in_host` when unset.
    pub out_host: Option<String>,
    /// Maximum number of source indexes read at once.
    pub threads: usize,
    /// Scroll page size and bulk batch size.
    pub buffer_size: usize,
}

impl RollupConfig {
    /// Check every field and compile the index filter.
    ///
    /// Runs before any cluster I/O; any error here aborts the run.
    pub fn validate(&self) -> Result<Regex, ConfigError> {
        if self.in_filter.is_empty() {
            return Err(ConfigError::BlankFilter);
        }
        let filter =
            Regex::new(&self.in_filter).map_err(|e| ConfigError::InvalidFilter(e.to_string()))?;
        check_layout("input pattern (inpattern)", &self.in_pattern)?;
        check_layout("output pattern (outpattern)", &self.out_pattern)?;
        if self.in_host.is_empty() {
            return Err(ConfigError::BlankHost("input host (inhost)"));
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        Ok(filter)
    }

    pub fn out_host(&self) -> &str {
        match self.out_host.as_deref() {
            Some(host) if !host.is_empty() => host,
            _ => &self.in_host,
        }
    }
}

fn check_layout(name: &'static str, layout: &str) -> Result<(), ConfigError> {
    if layout.is_empty() {
        return Err(ConfigError::BlankPattern(name));
    }
    if StrftimeItems::new(layout).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidPattern {
            name,
            layout: layout.to_string(),
        });
    }
    Ok(())
}

// ── Elasticsearch connection ──────────────────────────────────

/// Connection tunables shared by the source and destination clients.
///
/// Reads from environment variables with optional profile prefix.
/// When `ROLLUP_PROFILE=PROD`, checks `PROD_ES_REQUEST_TIMEOUT_SECS` before
/// `ES_REQUEST_TIMEOUT_SECS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub request_timeout_secs: u64,
    /// Scroll context keep-alive, in Elasticsearch time units (e.g. `1m`).
    pub scroll_keepalive: String,
    /// Concurrent bulk committers.
    pub bulk_workers: usize,
    /// Commit partially filled batches after this long (0 = only on size or flush).
    pub bulk_flush_interval_ms: u64,
    /// Retries for a bulk request that failed as a whole.
    pub bulk_max_retries: u32,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            scroll_keepalive: "1m".to_string(),
            bulk_workers: 2,
            bulk_flush_interval_ms: 0,
            bulk_max_retries: 3,
            username: None,
            password: None,
        }
    }
}

impl ElasticConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        let profile = env_opt("ROLLUP_PROFILE")
            .map(|s| s.to_uppercase())
            .unwrap_or_default();
        Self::from_env_profiled(&profile)
    }

    pub fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            request_timeout_secs: profiled_env_u64(
                p,
                "ES_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            scroll_keepalive: profiled_env_or(p, "ES_SCROLL_KEEPALIVE", &defaults.scroll_keepalive),
            bulk_workers: profiled_env_u32(p, "ES_BULK_WORKERS", defaults.bulk_workers as u32)
                .max(1) as usize,
            bulk_flush_interval_ms: profiled_env_u64(
                p,
                "ES_BULK_FLUSH_INTERVAL_MS",
                defaults.bulk_flush_interval_ms,
            ),
            bulk_max_retries: profiled_env_u32(p, "ES_BULK_MAX_RETRIES", defaults.bulk_max_retries),
            username: profiled_env_opt(p, "ES_USERNAME"),
            password: profiled_env_opt(p, "ES_PASSWORD"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bulk_flush_interval(&self) -> Option<Duration> {
        (self.bulk_flush_interval_ms > 0).then(|| Duration::from_millis(self.bulk_flush_interval_ms))
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            timeout_secs = self.request_timeout_secs,
            keepalive = %self.scroll_keepalive,
            bulk_workers = self.bulk_workers,
            flush_interval_ms = self.bulk_flush_interval_ms,
            max_retries = self.bulk_max_retries,
            auth = self.username.is_some(),
            "Elasticsearch client config"
        );
    }
}

// ── Tests ────────────────────────────────────────────────────
