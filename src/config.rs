//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILQUERY_CONFIG` (environment variable)
//! 2. `~/.config/mailquery/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailquery\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Execution planner tuning.
    pub planner: PlannerConfig,
    /// Operation-tree rewrite tuning.
    pub optimizer: OptimizerConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default sort order, e.g. "date-desc", "subject-asc", "none".
    pub default_sort: String,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Tuning for the relational/full-text execution planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Fraction of indexed documents a single term must match before the
    /// relational store is queried first.
    pub text_first_doc_freq_cutoff: f64,
    /// Number of full-text hits fetched when probing selectivity.
    pub probe_hits: usize,
    /// Rows requested by the first chunk of a relational scan.
    pub initial_chunk_size: usize,
    /// Upper bound for chunk growth.
    pub max_chunk_size: usize,
    /// Largest index-id set pushed into a single relational query.
    pub in_clause_batch_size: usize,
    /// Entries kept by the per-operation duplicate-hit cache.
    pub dedup_capacity: usize,
}

/// When an intersection over a union is rewritten into a union of
/// intersections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionPolicy {
    /// Distribute every union operand of an intersection.
    Always,
    /// Distribute only unions that span more than one explicit target.
    MultiTarget,
}

/// Tuning for the operation-tree optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Distribution policy for unions nested in intersections.
    pub distribution: DistributionPolicy,
    /// Single-target unions wider than this are left in place.
    pub max_distribution_fanout: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_sort: "date-desc".to_string(),
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            text_first_doc_freq_cutoff: 0.8,
            probe_hits: 1000,
            initial_chunk_size: 100,
            max_chunk_size: 2000,
            in_clause_batch_size: 1000,
            dedup_capacity: 2048,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            distribution: DistributionPolicy::Always,
            max_distribution_fanout: 64,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILQUERY_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailquery").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailquery")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailquery.log")
}
