//! Configuration loading.
//!
//! Loads toolgate configuration from `./toolgate.toml` (or
//! `$TOOLGATE_CONFIG_PATH`). A missing file means defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::tools::ToolOptions;

/// Config file read when `$TOOLGATE_CONFIG_PATH` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "toolgate.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings (`[engine]`).
    pub engine: EngineConfig,
    /// Where audit and runtime logs are written (`[paths]`).
    pub paths: PathsConfig,
    /// Log verbosity and in-memory tail size (`[logging]`).
    pub logging: LoggingConfig,
    /// Per-tool policy overrides (`[[tools]]`).
    pub tools: Vec<ToolPolicyConfig>,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("TOOLGATE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process env.
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TOOLGATE_OWNER_ID") {
            match v.trim().parse() {
                Ok(id) => self.engine.owner_id = id,
                Err(_) => tracing::warn!(
                    var = "TOOLGATE_OWNER_ID",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("TOOLGATE_CONFIRMATION_TTL_SECS") {
            match v.trim().parse() {
                Ok(secs) => self.engine.confirmation_ttl_secs = secs,
                Err(_) => tracing::warn!(
                    var = "TOOLGATE_CONFIRMATION_TTL_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Paths.
        if let Some(v) = env("TOOLGATE_ACTIONS_DIR") {
            self.paths.actions_dir = v;
        }
        if let Some(v) = env("TOOLGATE_LOGS_DIR") {
            self.paths.logs_dir = v;
        }

        if let Some(v) = env("TOOLGATE_LOG_LEVEL") {
            self.logging.log_level = v;
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has the wrong shape.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Policy configured for `name`, if any. The last entry wins.
    pub fn tool_options(&self, name: &str) -> Option<ToolOptions> {
        self.tools
            .iter()
            .rev()
            .find(|t| t.name == name)
            .map(|t| t.options.clone())
    }
}

// ── Engine config ───────────────────────────────────────────────

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The single principal allowed to call owner-only tools.
    pub owner_id: i64,
    /// Lifetime of a confirmation token.
    pub confirmation_ttl_secs: u64,
    /// How long a settled confirmation keeps replaying its result.
    pub result_retention_secs: u64,
    /// Period of the expired-token sweeper; 0 disables it.
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            owner_id: 0,
            confirmation_ttl_secs: 60,
            result_retention_secs: 86_400,
            sweep_interval_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Confirmation token lifetime.
    pub fn confirmation_ttl(&self) -> Duration {
        Duration::from_secs(self.confirmation_ttl_secs)
    }

    /// Retention of settled results.
    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    /// Sweeper period, or `None` when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

// ── Paths config ────────────────────────────────────────────────

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the audit trail and daily execution logs.
    pub actions_dir: String,
    /// Directory holding rotated runtime logs.
    pub logs_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            actions_dir: "./data/logs/actions".to_owned(),
            logs_dir: "./data/logs/runtime".to_owned(),
        }
    }
}

impl PathsConfig {
    /// Actions directory as a path.
    pub fn actions_dir(&self) -> PathBuf {
        PathBuf::from(&self.actions_dir)
    }

    /// Runtime logs directory as a path.
    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.logs_dir)
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Entries kept in memory by the audit trail and execution log.
    pub recent_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            recent_capacity: 1024,
        }
    }
}

// ── Tool policies ───────────────────────────────────────────────

/// Policy entry for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolPolicyConfig {
    /// Tool name the policy applies to.
    pub name: String,
    /// Policy fields.
    #[serde(flatten)]
    pub options: ToolOptions,
}

/// Resolve the per-user config directory (`~/.toolgate/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".toolgate"))
}

// ── Tests ───────────────────────────────────────────────────────
