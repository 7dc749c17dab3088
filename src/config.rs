//! Evaluator configuration
//!
//! Defaults, optionally overridden by a TOML file (`EVALUATOR_CONFIG`),
//! then by environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// Evaluation settings shared by the executor and the test runner
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Wall-clock bound per test case in milliseconds (default: 30000ms = 30s)
    pub timeout_ms: u64,
    /// Address space ceiling for a bot process in MB (default: 512MB)
    pub max_memory_mb: u64,
    /// Clear the environment and apply rlimits to bot processes
    pub sandbox_enabled: bool,
    /// Upper bound on concurrently running bot processes per submission
    pub max_parallel: usize,
    /// Python interpreter used to run bots
    pub python_bin: String,
    /// Cap on captured stdout/stderr bytes per bot process
    pub max_output_bytes: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_memory_mb: 512,
            sandbox_enabled: true,
            max_parallel: 1,
            python_bin: "python3".to_string(),
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl EvaluatorConfig {
    /// Load configuration: defaults, then `EVALUATOR_CONFIG` file, then env vars
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("EVALUATOR_CONFIG") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read evaluator config {}", path))?;
                info!("Loaded evaluator config from {}", path);
                Self::from_toml_str(&content)?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid evaluator config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("BOT_TIMEOUT") {
            let secs: f64 = v
                .parse()
                .with_context(|| format!("Invalid BOT_TIMEOUT: {}", v))?;
            if !secs.is_finite() || secs <= 0.0 {
                anyhow::bail!("BOT_TIMEOUT must be positive, got {}", v);
            }
            self.timeout_ms = (secs * 1000.0).round() as u64;
        }
        if let Some(v) = lookup("MAX_MEMORY_MB") {
            self.max_memory_mb = v
                .parse()
                .with_context(|| format!("Invalid MAX_MEMORY_MB: {}", v))?;
        }
        if let Some(v) = lookup("SANDBOX_ENABLED") {
            self.sandbox_enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("MAX_PARALLEL") {
            self.max_parallel = v
                .parse()
                .with_context(|| format!("Invalid MAX_PARALLEL: {}", v))?;
        }
        if let Some(v) = lookup("PYTHON_BIN") {
            self.python_bin = v;
        }
        if let Some(v) = lookup("MAX_OUTPUT_BYTES") {
            self.max_output_bytes = v
                .parse()
                .with_context(|| format!("Invalid MAX_OUTPUT_BYTES: {}", v))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }
        if self.max_parallel == 0 {
            anyhow::bail!("max_parallel must be at least 1");
        }
        if self.python_bin.trim().is_empty() {
            anyhow::bail!("python_bin must not be empty");
        }
        Ok(())
    }

    /// Per-test-case wall-clock bound
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Same settings with a different timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EvaluatorConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_parallel, 1);
        assert!(config.sandbox_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let config = EvaluatorConfig::from_toml_str("timeout_ms = 1500\nmax_parallel = 4\n").unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.python_bin, "python3");
    }

    #[test]
    fn test_toml_rejects_zero_parallelism() {
        assert!(EvaluatorConfig::from_toml_str("max_parallel = 0").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BOT_TIMEOUT", "2.5"),
            ("MAX_MEMORY_MB", "128"),
            ("SANDBOX_ENABLED", "false"),
            ("PYTHON_BIN", "pypy3"),
        ]
        .into_iter()
        .collect();

        let mut config = EvaluatorConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.max_memory_mb, 128);
        assert!(!config.sandbox_enabled);
        assert_eq!(config.python_bin, "pypy3");
    }

    #[test]
    fn test_invalid_timeout_override() {
        let mut config = EvaluatorConfig::default();
        assert!(config
            .apply_overrides(|k| (k == "BOT_TIMEOUT").then(|| "-1".to_string()))
            .is_err());
        assert!(config
            .apply_overrides(|k| (k == "BOT_TIMEOUT").then(|| "soon".to_string()))
            .is_err());
    }
}
