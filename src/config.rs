//! TOML configuration for TestPilot.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup. Lookup order: explicit path, the `TESTPILOT_CONFIG`
//! environment variable, `./testpilot.toml`, compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "TESTPILOT_CONFIG";
pub const LOCAL_CONFIG: &str = "testpilot.toml";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("execution.success_rate must be within [0, 1], got {0}")]
    SuccessRate(f64),
    #[error("execution duration range {min}..{max} ms is empty or starts at zero")]
    DurationRange { min: u64, max: u64 },
    #[error("execution.case_timeout_ms must be greater than zero")]
    ZeroTimeout,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the fallbacks are
    /// best-effort and fall through to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        // 1. Environment variable override.
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TESTPILOT_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        // 2. Working directory.
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        // 3. Defaults.
        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution.validate()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database file; ignored by the memory backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("data/testpilot.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Random outcomes with simulated timing.
    Simulated,
    /// Fetch the target over HTTP and judge reachability.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub strategy: StrategyKind,
    /// Probability that a simulated check passes.
    pub success_rate: f64,
    /// Simulated durations are drawn from `min_duration_ms..max_duration_ms`.
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    /// Fixed seed for reproducible simulated runs.
    pub seed: Option<u64>,
    /// Pause before each category's executor call.
    pub generate_delay_ms: u64,
    /// Pause after each category completes.
    pub settle_delay_ms: u64,
    /// Per-category timeout; a timeout counts as a failed case.
    pub case_timeout_ms: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Simulated,
            success_rate: 0.7,
            min_duration_ms: 500,
            max_duration_ms: 3500,
            seed: None,
            generate_delay_ms: 1000,
            settle_delay_ms: 800,
            case_timeout_ms: Some(30_000),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(ConfigError::SuccessRate(self.success_rate));
        }
        if self.min_duration_ms == 0 || self.min_duration_ms >= self.max_duration_ms {
            return Err(ConfigError::DurationRange {
                min: self.min_duration_ms,
                max: self.max_duration_ms,
            });
        }
        if self.case_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn generate_delay(&self) -> Duration {
        Duration::from_millis(self.generate_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn case_timeout(&self) -> Option<Duration> {
        self.case_timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.execution.strategy, StrategyKind::Simulated);
        assert!((cfg.execution.success_rate - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [execution]
            seed = 42
            generate_delay_ms = 0

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.execution.seed, Some(42));
        assert_eq!(cfg.execution.generate_delay(), Duration::ZERO);
        assert_eq!(cfg.execution.settle_delay_ms, 800);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let mut cfg = Config::default();
        cfg.execution.success_rate = 1.5;
        assert_eq!(cfg.validate(), Err(ConfigError::SuccessRate(1.5)));

        cfg.execution.success_rate = f64::NAN;
        assert!(matches!(cfg.validate(), Err(ConfigError::SuccessRate(_))));
    }

    #[test]
    fn test_validate_rejects_empty_duration_range() {
        let mut cfg = Config::default();
        cfg.execution.min_duration_ms = 900;
        cfg.execution.max_duration_ms = 900;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DurationRange { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testpilot.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[server]\nbind = \"0.0.0.0:9000\"").unwrap();

        let cfg = Config::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::resolve(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
