//! Configuration loaded from `smsrelay.toml`.
//!
//! Keys missing from the file fall back to defaults. The environment variable
//! `SMSRELAY_SYNC_INTERVAL_SECS` takes precedence over the file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device_log::{AddressMatcher, ExactDigitsMatcher, LooseNumberMatcher};
use crate::dispatcher::DispatchOptions;
use crate::error::RelayError;
use crate::syncer::SyncOptions;
use crate::tracker::TrackerPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "smsrelay.toml";
pub const SYNC_INTERVAL_ENV: &str = "SMSRELAY_SYNC_INTERVAL_SECS";

/// How reconciliation compares a message's phone with a log record's address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMatching {
    /// National/international prefix tolerant.
    #[default]
    Loose,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Store messages as `sent` when the job is expanded.
    #[serde(default)]
    pub optimistic_sent_on_dispatch: bool,

    /// Discard delivery reports; jobs complete once every message is sent.
    #[serde(default)]
    pub ignore_delivery_reports: bool,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Number of recent transport log records read per reconciliation pass.
    #[serde(default = "default_sync_window")]
    pub sync_window: usize,

    #[serde(default)]
    pub address_matching: AddressMatching,

    /// Shortest shared digit suffix the loose matcher accepts.
    #[serde(default = "default_min_match_digits")]
    pub min_match_digits: usize,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_sync_window() -> usize {
    200
}

fn default_min_match_digits() -> usize {
    7
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            optimistic_sent_on_dispatch: false,
            ignore_delivery_reports: false,
            sync_interval_secs: default_sync_interval_secs(),
            sync_window: default_sync_window(),
            address_matching: AddressMatching::default(),
            min_match_digits: default_min_match_digits(),
            log_filter: default_log_filter(),
            log_json: false,
        }
    }
}

impl RelayConfig {
    /// Load from `path`, or from `smsrelay.toml` in the working directory.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_override(std::env::var(SYNC_INTERVAL_ENV).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, RelayError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    fn apply_env_override(&mut self, sync_interval: Option<String>) -> Result<(), RelayError> {
        if let Some(value) = sync_interval
            && !value.trim().is_empty()
        {
            self.sync_interval_secs = value.trim().parse().map_err(|_| {
                RelayError::Config(format!("{SYNC_INTERVAL_ENV} is not a number: {value:?}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.sync_interval_secs == 0 {
            return Err(RelayError::Config("sync_interval_secs must be positive".into()));
        }
        if self.sync_window == 0 {
            return Err(RelayError::Config("sync_window must be positive".into()));
        }
        if self.min_match_digits == 0 {
            return Err(RelayError::Config("min_match_digits must be positive".into()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, RelayError> {
        toml::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            optimistic_sent_on_dispatch: self.optimistic_sent_on_dispatch,
        }
    }

    pub fn tracker_policy(&self) -> TrackerPolicy {
        TrackerPolicy {
            ignore_delivery_reports: self.ignore_delivery_reports,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            interval: Duration::from_secs(self.sync_interval_secs),
            window: self.sync_window,
        }
    }

    pub fn address_matcher(&self) -> Arc<dyn AddressMatcher> {
        match self.address_matching {
            AddressMatching::Loose => Arc::new(LooseNumberMatcher::new(self.min_match_digits)),
            AddressMatching::Exact => Arc::new(ExactDigitsMatcher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = RelayConfig::default();
        assert!(!config.optimistic_sent_on_dispatch);
        assert!(!config.ignore_delivery_reports);
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.sync_window, 200);
        assert_eq!(config.address_matching, AddressMatching::Loose);
        assert_eq!(config.min_match_digits, 7);
        assert_eq!(config.log_filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            ignore_delivery_reports = true
            sync_interval_secs = 15
            address_matching = "exact"
        "#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert!(config.ignore_delivery_reports);
        assert_eq!(config.sync_interval_secs, 15);
        assert_eq!(config.address_matching, AddressMatching::Exact);
        assert_eq!(config.sync_window, 200);
        assert!(config.tracker_policy().ignore_delivery_reports);
        assert_eq!(config.sync_options().interval, Duration::from_secs(15));
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "optimistic_sent_on_dispatch = true\nsync_window = 50").unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert!(config.dispatch_options().optimistic_sent_on_dispatch);
        assert_eq!(config.sync_window, 50);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RelayConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[test]
    fn bad_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sync_interval_secs = \"soon\"").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(RelayError::Toml(_))
        ));
    }

    #[test]
    fn env_override_wins_over_file() {
        let mut config = RelayConfig::default();
        config.apply_env_override(Some("5".into())).unwrap();
        assert_eq!(config.sync_interval_secs, 5);

        config.apply_env_override(None).unwrap();
        assert_eq!(config.sync_interval_secs, 5);

        assert!(config.apply_env_override(Some("often".into())).is_err());
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = RelayConfig {
            sync_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let config = RelayConfig {
            min_match_digits: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn matcher_follows_configuration() {
        let loose = RelayConfig::default().address_matcher();
        assert!(loose.same_address("+48600100200", "600100200"));

        let exact = RelayConfig {
            address_matching: AddressMatching::Exact,
            ..Default::default()
        }
        .address_matcher();
        assert!(!exact.same_address("+48600100200", "600100200"));
    }

    #[test]
    fn renders_as_toml() {
        let rendered = RelayConfig::default().to_toml().unwrap();
        let parsed: RelayConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, RelayConfig::default());
    }
}
