//! Guard configuration.
//!
//! Thresholds default to the values below, can be overridden from the
//! environment (`LOOPGUARD_*`), and from a config file discovered with the
//! prefer crate or passed explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::guard::IgnoreList;

/// Requests to one URL within the burst window that count as a loop.
pub const DEFAULT_BURST_THRESHOLD: usize = 20;
pub const DEFAULT_BURST_WINDOW: Duration = Duration::from_secs(1);

/// Requests to one URL within the sustained window that count as a loop.
pub const DEFAULT_SUSTAINED_THRESHOLD: usize = 200;
pub const DEFAULT_SUSTAINED_WINDOW: Duration = Duration::from_secs(60);

/// Minimum burst-window samples before the mean gap is considered.
pub const DEFAULT_UNIFORM_MIN_SAMPLES: usize = 5;
pub const DEFAULT_UNIFORM_MAX_MEAN_GAP: Duration = Duration::from_millis(50);

/// Fixed suppression window once a URL is blocked.
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_millis(3000);

/// Consecutive failures before a URL is blocked.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 10;

pub const DEFAULT_HISTORY_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Blocking a URL containing this path also wipes stored credentials.
pub const DEFAULT_LOGIN_PATH: &str = "/api/auth/login";

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for a [`LoopGuard`](crate::guard::LoopGuard).
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Administrative enable flag at construction time.
    pub enabled: bool,
    pub burst_threshold: usize,
    pub burst_window: Duration,
    pub sustained_threshold: usize,
    pub sustained_window: Duration,
    pub uniform_min_samples: usize,
    /// Mean gap between burst-window requests below which traffic is a loop.
    pub uniform_max_mean_gap: Duration,
    pub block_duration: Duration,
    pub error_threshold: u32,
    /// Request history older than this is pruned by the sweep.
    pub history_retention: Duration,
    /// Maximum request records held; oldest are dropped first.
    pub history_capacity: usize,
    pub sweep_interval: Duration,
    pub ignore: IgnoreList,
    pub login_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::base_default().with_env_overrides()
    }
}

impl GuardConfig {
    /// Built-in defaults without environment overrides.
    pub fn base_default() -> Self {
        Self {
            enabled: true,
            burst_threshold: DEFAULT_BURST_THRESHOLD,
            burst_window: DEFAULT_BURST_WINDOW,
            sustained_threshold: DEFAULT_SUSTAINED_THRESHOLD,
            sustained_window: DEFAULT_SUSTAINED_WINDOW,
            uniform_min_samples: DEFAULT_UNIFORM_MIN_SAMPLES,
            uniform_max_mean_gap: DEFAULT_UNIFORM_MAX_MEAN_GAP,
            block_duration: DEFAULT_BLOCK_DURATION,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            history_retention: DEFAULT_HISTORY_RETENTION,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            ignore: IgnoreList::default(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `LOOPGUARD_ENABLED`: "true" or "false"
    /// - `LOOPGUARD_BURST_THRESHOLD`, `LOOPGUARD_SUSTAINED_THRESHOLD`
    /// - `LOOPGUARD_UNIFORM_MAX_MEAN_GAP_MS`, `LOOPGUARD_BLOCK_DURATION_MS`
    /// - `LOOPGUARD_ERROR_THRESHOLD`, `LOOPGUARD_HISTORY_CAPACITY`
    /// - `LOOPGUARD_SWEEP_INTERVAL_MS`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(enabled) = env_bool("LOOPGUARD_ENABLED") {
            self.enabled = enabled;
        }
        if let Some(v) = env_u64("LOOPGUARD_BURST_THRESHOLD") {
            self.burst_threshold = v as usize;
        }
        if let Some(v) = env_u64("LOOPGUARD_SUSTAINED_THRESHOLD") {
            self.sustained_threshold = v as usize;
        }
        self.uniform_max_mean_gap =
            get_duration_from_env("LOOPGUARD_UNIFORM_MAX_MEAN_GAP_MS", self.uniform_max_mean_gap);
        self.block_duration =
            get_duration_from_env("LOOPGUARD_BLOCK_DURATION_MS", self.block_duration);
        if let Some(v) = env_u64("LOOPGUARD_ERROR_THRESHOLD") {
            self.error_threshold = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = env_u64("LOOPGUARD_HISTORY_CAPACITY") {
            self.history_capacity = v as usize;
        }
        self.sweep_interval =
            get_duration_from_env("LOOPGUARD_SWEEP_INTERVAL_MS", self.sweep_interval);
        self
    }

    /// Check that every threshold and window can actually trigger.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_counts = [
            ("burst_threshold", self.burst_threshold),
            ("sustained_threshold", self.sustained_threshold),
            ("uniform_min_samples", self.uniform_min_samples),
            ("history_capacity", self.history_capacity),
            ("error_threshold", self.error_threshold as usize),
        ];
        for (name, value) in zero_counts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
            }
        }

        let zero_windows = [
            ("burst_window", self.burst_window),
            ("sustained_window", self.sustained_window),
            ("block_duration", self.block_duration),
            ("history_retention", self.history_retention),
            ("sweep_interval", self.sweep_interval),
        ];
        for (name, value) in zero_windows {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
            if value.as_millis() > i64::MAX as u128 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be at most {}ms",
                    name,
                    i64::MAX
                )));
            }
        }

        if self.uniform_min_samples < 2 {
            return Err(ConfigError::Invalid(
                "uniform_min_samples must be at least 2 to measure a gap".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a URL targets the login endpoint.
    pub fn is_login_url(&self, url: &str) -> bool {
        !self.login_path.is_empty() && url.contains(self.login_path.as_str())
    }
}

/// Configuration file structure. Durations are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustained_threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustained_window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform_min_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform_max_mean_gap_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_retention_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_ms: Option<u64>,
    /// Replaces the default ignore-list when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_patterns: Option<Vec<String>>,
    /// Appended to the (default or replaced) ignore-list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_ignore_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_path: Option<String>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl ConfigFile {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to an empty config (defaults plus env) when nothing is found.
    pub async fn load() -> Self {
        match prefer::load("loopguard").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring unreadable config: {}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML, and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse config contents in the format implied by a file extension.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Apply file overrides on top of an existing configuration.
    pub fn apply_to(&self, config: &mut GuardConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(v) = self.burst_threshold {
            config.burst_threshold = v;
        }
        if let Some(ms) = self.burst_window_ms {
            config.burst_window = Duration::from_millis(ms);
        }
        if let Some(v) = self.sustained_threshold {
            config.sustained_threshold = v;
        }
        if let Some(ms) = self.sustained_window_ms {
            config.sustained_window = Duration::from_millis(ms);
        }
        if let Some(v) = self.uniform_min_samples {
            config.uniform_min_samples = v;
        }
        if let Some(ms) = self.uniform_max_mean_gap_ms {
            config.uniform_max_mean_gap = Duration::from_millis(ms);
        }
        if let Some(ms) = self.block_duration_ms {
            config.block_duration = Duration::from_millis(ms);
        }
        if let Some(v) = self.error_threshold {
            config.error_threshold = v;
        }
        if let Some(ms) = self.history_retention_ms {
            config.history_retention = Duration::from_millis(ms);
        }
        if let Some(v) = self.history_capacity {
            config.history_capacity = v;
        }
        if let Some(ms) = self.sweep_interval_ms {
            config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(ref patterns) = self.ignore_patterns {
            config.ignore = IgnoreList::new(patterns.iter().cloned());
        }
        config.ignore.extend(self.extra_ignore_patterns.iter().cloned());
        if let Some(ref login_path) = self.login_path {
            config.login_path = login_path.clone();
        }
    }

    /// Build the effective guard configuration: defaults, env, then file.
    pub fn into_guard_config(self) -> Result<GuardConfig, ConfigError> {
        let mut config = GuardConfig::default();
        self.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Snapshot a runtime config with every field populated.
    pub fn from_guard_config(config: &GuardConfig) -> Self {
        Self {
            enabled: Some(config.enabled),
            burst_threshold: Some(config.burst_threshold),
            burst_window_ms: Some(config.burst_window.as_millis() as u64),
            sustained_threshold: Some(config.sustained_threshold),
            sustained_window_ms: Some(config.sustained_window.as_millis() as u64),
            uniform_min_samples: Some(config.uniform_min_samples),
            uniform_max_mean_gap_ms: Some(config.uniform_max_mean_gap.as_millis() as u64),
            block_duration_ms: Some(config.block_duration.as_millis() as u64),
            error_threshold: Some(config.error_threshold),
            history_retention_ms: Some(config.history_retention.as_millis() as u64),
            history_capacity: Some(config.history_capacity),
            sweep_interval_ms: Some(config.sweep_interval.as_millis() as u64),
            ignore_patterns: Some(config.ignore.patterns().to_vec()),
            extra_ignore_patterns: Vec::new(),
            login_path: Some(config.login_path.clone()),
            source_path: None,
        }
    }
}

/// Milliseconds in a duration as epoch arithmetic uses them, saturating at `i64::MAX`.
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Get a duration in milliseconds from an environment variable, with default fallback.
pub fn get_duration_from_env(env_var: &str, default: Duration) -> Duration {
    env_u64(env_var)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_u64(env_var: &str) -> Option<u64> {
    std::env::var(env_var)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_bool(env_var: &str) -> Option<bool> {
    std::env::var(env_var)
        .ok()
        .and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
