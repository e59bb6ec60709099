//! Configuration management.
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML
//! config file, and `FOLDSCENE_*` environment variables.

use crate::search::BackoffConfig;
use crate::story::{DuplicatePolicy, StoryOptions};
use crate::sync::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for foldscene.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FoldsceneConfig {
    /// Search client settings.
    pub search: SearchConfig,
    /// Story generation settings.
    pub story: StoryConfig,
    /// Sync engine settings.
    pub sync: SyncConfig,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

/// Search service and polling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchConfig {
    /// Base URL of the search service (the `/search` path is appended).
    pub base_url: String,
    /// Default result limit.
    pub limit: u32,
    /// Whether superposition transforms are requested by default.
    pub superposition: bool,
    /// Total number of polls before giving up.
    pub max_attempts: u32,
    /// Delay after the first poll, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Hard ceiling on one search, in milliseconds.
    pub timeout_ms: u64,
    /// Per-request timeout, in milliseconds (0 to disable).
    pub request_timeout_ms: u64,
    /// Connect timeout, in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            limit: crate::models::DEFAULT_RESULT_LIMIT,
            superposition: true,
            max_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            timeout_ms: 30_000,
            request_timeout_ms: 10_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl SearchConfig {
    /// Returns the backoff schedule described by this config.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig::new(self.max_attempts, self.initial_backoff_ms, self.max_backoff_ms)
    }

    /// Returns the hard search ceiling.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Story generation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryConfig {
    /// Linger time per scene, in milliseconds.
    pub linger_ms: u64,
    /// Transition time between scenes, in milliseconds.
    pub transition_ms: u64,
    /// How duplicate object ids are handled.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for StoryConfig {
    fn default() -> Self {
        let options = StoryOptions::default();
        Self {
            linger_ms: options.linger_duration_ms,
            transition_ms: options.transition_duration_ms,
            duplicate_policy: options.duplicate_policy,
        }
    }
}

impl StoryConfig {
    /// Converts to builder options.
    #[must_use]
    pub fn options(&self) -> StoryOptions {
        StoryOptions {
            linger_duration_ms: self.linger_ms,
            transition_duration_ms: self.transition_ms,
            duplicate_policy: self.duplicate_policy,
            ..StoryOptions::default()
        }
    }
}

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    /// Debounce window for engine scene-change events, in milliseconds.
    pub debounce_ms: u64,
    /// Maximum number of queries kept in history.
    pub history_limit: usize,
    /// Lookups made while waiting for a snapshot to register.
    pub snapshot_wait_attempts: u32,
    /// Delay between snapshot lookups, in milliseconds.
    pub snapshot_wait_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            history_limit: 10,
            snapshot_wait_attempts: 5,
            snapshot_wait_delay_ms: 100,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format string, falling back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ObservabilitySettings {
    /// Log output format.
    pub log_format: LogFormat,
    /// Optional log file; stderr when unset.
    pub log_file: Option<PathBuf>,
    /// Explicit filter directive (e.g. `foldscene=debug`).
    pub log_filter: Option<String>,
    /// Whether metrics are recorded.
    pub metrics_enabled: bool,
    /// Port for the Prometheus listener.
    pub metrics_port: u16,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Search section.
    pub search: Option<ConfigFileSearch>,
    /// Story section.
    pub story: Option<ConfigFileStory>,
    /// Sync section.
    pub sync: Option<ConfigFileSync>,
    /// Observability section.
    pub observability: Option<ConfigFileObservability>,
}

/// Search section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSearch {
    /// Base URL.
    pub base_url: Option<String>,
    /// Result limit.
    pub limit: Option<u32>,
    /// Superposition flag.
    pub superposition: Option<bool>,
    /// Attempt budget.
    pub max_attempts: Option<u32>,
    /// Initial backoff.
    pub initial_backoff_ms: Option<u64>,
    /// Maximum backoff.
    pub max_backoff_ms: Option<u64>,
    /// Hard ceiling.
    pub timeout_ms: Option<u64>,
    /// Per-request timeout.
    pub request_timeout_ms: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
}

/// Story section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStory {
    /// Linger time.
    pub linger_ms: Option<u64>,
    /// Transition time.
    pub transition_ms: Option<u64>,
    /// `reject` or `keep_first`.
    pub duplicate_policy: Option<String>,
}

/// Sync section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSync {
    /// Debounce window.
    pub debounce_ms: Option<u64>,
    /// History bound.
    pub history_limit: Option<usize>,
    /// Snapshot wait attempts.
    pub snapshot_wait_attempts: Option<u32>,
    /// Snapshot wait delay.
    pub snapshot_wait_delay_ms: Option<u64>,
}

/// Observability section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileObservability {
    /// `pretty` or `json`.
    pub log_format: Option<String>,
    /// Log file path.
    pub log_file: Option<String>,
    /// Filter directive.
    pub log_filter: Option<String>,
    /// Metrics toggle.
    pub metrics_enabled: Option<bool>,
    /// Metrics port.
    pub metrics_port: Option<u16>,
}

impl FoldsceneConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::from_toml(&contents).map(Self::with_env_overrides)
    }

    /// Parses configuration from TOML text without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid config TOML.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir (`<config>/foldscene/config.toml`), then
    /// `~/.config/foldscene/config.toml`. Returns defaults (with env overrides)
    /// if no file is found or the file is unreadable.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default().with_env_overrides();
        };

        let candidates = [
            base_dirs.config_dir().join("foldscene").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("foldscene")
                .join("config.toml"),
        ];
        for path in &candidates {
            if path.exists() {
                match Self::load_from_file(path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(path = %path.display(), "Ignoring config file: {e}"),
                }
            }
        }

        Self::default().with_env_overrides()
    }

    /// Converts a `ConfigFile` to `FoldsceneConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(search) = file.search {
            let target = &mut config.search;
            if let Some(v) = search.base_url {
                target.base_url = v;
            }
            if let Some(v) = search.limit {
                target.limit = v.max(1);
            }
            if let Some(v) = search.superposition {
                target.superposition = v;
            }
            if let Some(v) = search.max_attempts {
                target.max_attempts = v.max(1);
            }
            if let Some(v) = search.initial_backoff_ms {
                target.initial_backoff_ms = v;
            }
            if let Some(v) = search.max_backoff_ms {
                target.max_backoff_ms = v;
            }
            if let Some(v) = search.timeout_ms {
                target.timeout_ms = v;
            }
            if let Some(v) = search.request_timeout_ms {
                target.request_timeout_ms = v;
            }
            if let Some(v) = search.connect_timeout_ms {
                target.connect_timeout_ms = v;
            }
        }
        if let Some(story) = file.story {
            if let Some(v) = story.linger_ms {
                config.story.linger_ms = v;
            }
            if let Some(v) = story.transition_ms {
                config.story.transition_ms = v;
            }
            if let Some(v) = story.duplicate_policy {
                config.story.duplicate_policy = DuplicatePolicy::parse(&v);
            }
        }
        if let Some(sync) = file.sync {
            if let Some(v) = sync.debounce_ms {
                config.sync.debounce_ms = v;
            }
            if let Some(v) = sync.history_limit {
                config.sync.history_limit = v.max(1);
            }
            if let Some(v) = sync.snapshot_wait_attempts {
                config.sync.snapshot_wait_attempts = v.max(1);
            }
            if let Some(v) = sync.snapshot_wait_delay_ms {
                config.sync.snapshot_wait_delay_ms = v;
            }
        }
        if let Some(obs) = file.observability {
            if let Some(v) = obs.log_format {
                config.observability.log_format = LogFormat::parse(&v);
            }
            config.observability.log_file = obs.log_file.map(PathBuf::from);
            config.observability.log_filter = obs.log_filter;
            if let Some(v) = obs.metrics_enabled {
                config.observability.metrics_enabled = v;
            }
            if let Some(v) = obs.metrics_port {
                config.observability.metrics_port = v;
            }
        }

        config
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `FOLDSCENE_SEARCH_URL` | `search.base_url` |
    /// | `FOLDSCENE_SEARCH_LIMIT` | `search.limit` |
    /// | `FOLDSCENE_SEARCH_MAX_ATTEMPTS` | `search.max_attempts` |
    /// | `FOLDSCENE_SEARCH_INITIAL_BACKOFF_MS` | `search.initial_backoff_ms` |
    /// | `FOLDSCENE_SEARCH_MAX_BACKOFF_MS` | `search.max_backoff_ms` |
    /// | `FOLDSCENE_SEARCH_TIMEOUT_MS` | `search.timeout_ms` |
    /// | `FOLDSCENE_SYNC_DEBOUNCE_MS` | `sync.debounce_ms` |
    /// | `FOLDSCENE_LOG_FORMAT` | `observability.log_format` |
    /// | `FOLDSCENE_METRICS_ENABLED` | `observability.metrics_enabled` |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("FOLDSCENE_SEARCH_URL") {
            if !v.trim().is_empty() {
                self.search.base_url = v;
            }
        }
        if let Some(v) = parse_env::<u32>("FOLDSCENE_SEARCH_LIMIT") {
            self.search.limit = v.max(1);
        }
        if let Some(v) = parse_env::<u32>("FOLDSCENE_SEARCH_MAX_ATTEMPTS") {
            self.search.max_attempts = v.max(1);
        }
        if let Some(v) = parse_env::<u64>("FOLDSCENE_SEARCH_INITIAL_BACKOFF_MS") {
            self.search.initial_backoff_ms = v;
        }
        if let Some(v) = parse_env::<u64>("FOLDSCENE_SEARCH_MAX_BACKOFF_MS") {
            self.search.max_backoff_ms = v;
        }
        if let Some(v) = parse_env::<u64>("FOLDSCENE_SEARCH_TIMEOUT_MS") {
            self.search.timeout_ms = v;
        }
        if let Some(v) = parse_env::<u64>("FOLDSCENE_SYNC_DEBOUNCE_MS") {
            self.sync.debounce_ms = v;
        }
        if let Ok(v) = std::env::var("FOLDSCENE_LOG_FORMAT") {
            self.observability.log_format = LogFormat::parse(&v);
        }
        if let Ok(v) = std::env::var("FOLDSCENE_METRICS_ENABLED") {
            self.observability.metrics_enabled = v.to_lowercase() == "true" || v == "1";
        }
        self
    }

    /// Returns the sync engine configuration derived from this config.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            debounce: Duration::from_millis(self.sync.debounce_ms),
            history_limit: self.sync.history_limit,
            snapshot_wait_attempts: self.sync.snapshot_wait_attempts,
            snapshot_wait_delay: Duration::from_millis(self.sync.snapshot_wait_delay_ms),
            story: self.story.options(),
            event_bus_capacity: EngineConfig::default().event_bus_capacity,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FoldsceneConfig::default();
        assert_eq!(config.search.limit, 10);
        assert_eq!(config.search.timeout_ms, 30_000);
        assert_eq!(config.sync.debounce_ms, 100);
        assert_eq!(config.sync.snapshot_wait_attempts, 5);
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let toml = r#"
            [search]
            base_url = "https://search.example.org"
            max_attempts = 3
            initial_backoff_ms = 1000
            max_backoff_ms = 10000

            [story]
            duplicate_policy = "keep_first"

            [sync]
            debounce_ms = 50
            history_limit = 0

            [observability]
            log_format = "json"
        "#;
        let config = FoldsceneConfig::from_toml(toml).expect("parse");
        assert_eq!(config.search.base_url, "https://search.example.org");
        assert_eq!(config.search.backoff().max_attempts, 3);
        assert_eq!(config.story.duplicate_policy, DuplicatePolicy::KeepFirst);
        assert_eq!(config.sync.debounce_ms, 50);
        assert_eq!(config.sync.history_limit, 1);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        // Untouched values keep their defaults
        assert_eq!(config.search.limit, 10);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = FoldsceneConfig::from_toml("[search\nlimit = ").expect_err("should fail");
        assert!(matches!(err, crate::Error::OperationFailed { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[search]\nlimit = 25").expect("write");
        let config = FoldsceneConfig::load_from_file(file.path()).expect("load");
        assert_eq!(config.search.limit, 25);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = FoldsceneConfig::load_from_file(Path::new("/nonexistent/foldscene.toml"))
            .expect_err("should fail");
        assert!(err.to_string().contains("read_config_file"));
    }

    #[test]
    fn test_engine_config_carries_sync_settings() {
        let mut config = FoldsceneConfig::default();
        config.sync.debounce_ms = 250;
        config.story.linger_ms = 1234;
        let engine = config.engine_config();
        assert_eq!(engine.debounce, Duration::from_millis(250));
        assert_eq!(engine.story.linger_duration_ms, 1234);
    }
}
