//! Configuration
//!
//! Loaded from an optional YAML file; every section falls back to its
//! defaults. A `.env` file next to the working directory can override the
//! database path and the lookup user agent.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub resolver: ResolverConfig,
    pub lookup: LookupConfig,
    pub worker: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            resolver: ResolverConfig::default(),
            lookup: LookupConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Matching thresholds. None of these are calibrated against real
/// transcript noise yet, hence configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Fuzzy score accepted on its own
    pub high_threshold: f64,
    /// Lower edge of the band that needs an author match
    pub mid_threshold: f64,
    pub author_boost: f64,
    pub boost_cap: f64,
    pub external_confidence: f64,
    pub short_key_confidence: f64,
    /// Scores this close to the best are treated as a tie
    pub tie_epsilon: f64,
    /// Minimum name similarity for an author hint to count
    pub author_match_threshold: f64,
    pub max_redirect_hops: usize,
    pub version: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.85,
            mid_threshold: 0.60,
            author_boost: 0.10,
            boost_cap: 0.95,
            external_confidence: 0.90,
            short_key_confidence: 0.95,
            tie_epsilon: 0.01,
            author_match_threshold: 0.90,
            max_redirect_hops: crate::database::DEFAULT_MAX_REDIRECT_HOPS,
            version: format!("resolver-{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let unit = [
            ("high_threshold", self.high_threshold),
            ("mid_threshold", self.mid_threshold),
            ("author_boost", self.author_boost),
            ("boost_cap", self.boost_cap),
            ("external_confidence", self.external_confidence),
            ("short_key_confidence", self.short_key_confidence),
            ("tie_epsilon", self.tie_epsilon),
            ("author_match_threshold", self.author_match_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config(format!(
                    "resolver.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.mid_threshold > self.high_threshold {
            return Err(AppError::Config(format!(
                "resolver.mid_threshold ({}) is above resolver.high_threshold ({})",
                self.mid_threshold, self.high_threshold
            )));
        }
        if self.max_redirect_hops == 0 {
            return Err(AppError::Config(
                "resolver.max_redirect_hops must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    pub user_agent: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://openlibrary.org".to_string(),
            timeout_secs: 10,
            requests_per_second: 1,
            user_agent: format!("book-resolver/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
        }
    }
}

impl AppConfig {
    /// Read `path` if given, apply `.env` overrides from `env_dir`, validate.
    pub fn load(path: Option<&Path>, env_dir: &Path) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                let config: AppConfig = serde_yaml::from_str(&text)?;
                log::info!("Loaded config from {}", path.display());
                config
            }
            None => AppConfig::default(),
        };

        if let Some(db) = load_env_value(env_dir, "BOOK_RESOLVER_DB") {
            log::info!("Database path overridden from .env");
            config.database_path = PathBuf::from(db);
        }
        if let Some(agent) = load_env_value(env_dir, "OPENLIBRARY_USER_AGENT") {
            config.lookup.user_agent = agent;
        }

        config.resolver.validate()?;
        Ok(config)
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("book-resolver")
        .join("books.db")
}

/// Load a value from the .env file by key name
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    let env_path = dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(env_path).ok()?;
    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}
