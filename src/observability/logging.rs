//! Log output configuration.

use crate::config::{LogFormat, ObservabilitySettings};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "foldscene=info";
const VERBOSE_FILTER: &str = "foldscene=debug";

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Optional log file; stderr when unset.
    pub file: Option<PathBuf>,
    /// Level filter.
    pub filter: EnvFilter,
}

impl LoggingConfig {
    /// Builds logging configuration from settings.
    ///
    /// Filter precedence: `FOLDSCENE_LOG`, then `RUST_LOG`, then the
    /// configured directive, then `foldscene=debug` when verbose, otherwise
    /// `foldscene=info`.
    #[must_use]
    pub fn from_settings(settings: Option<&ObservabilitySettings>, verbose: bool) -> Self {
        let format = settings.map(|s| s.log_format).unwrap_or_default();
        let file = settings.and_then(|s| s.log_file.clone());
        let configured = settings.and_then(|s| s.log_filter.clone());

        let directive = std::env::var("FOLDSCENE_LOG")
            .ok()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .or(configured)
            .unwrap_or_else(|| {
                if verbose {
                    VERBOSE_FILTER.to_string()
                } else {
                    DEFAULT_FILTER.to_string()
                }
            });

        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| {
            // Unparseable directives fall back rather than abort startup
            EnvFilter::new(DEFAULT_FILTER)
        });

        Self {
            format,
            file,
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_carry_format_and_file() {
        let settings = ObservabilitySettings {
            log_format: LogFormat::Json,
            log_file: Some(PathBuf::from("/tmp/foldscene.log")),
            ..ObservabilitySettings::default()
        };
        let config = LoggingConfig::from_settings(Some(&settings), false);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/foldscene.log")));
    }

    #[test]
    fn test_defaults_without_settings() {
        let config = LoggingConfig::from_settings(None, true);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
    }
}
