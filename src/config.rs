//! Daemon settings: built-in defaults, then an optional TOML file, then
//! `TICKSCOPE_*` environment variables, then command-line flags.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tickscope_sdk::{
    default_user_agent, ReconnectPolicy, DEFAULT_CONTENT_URL, DEFAULT_HISTORY_LENGTH,
    DEFAULT_SOCKET_HOST, DEFAULT_VIEWER_URL, TARGET_TICK_RATE,
};

use crate::duration::serde_human;
use crate::ticker::tick_period;

/// Prefix for environment overrides, e.g. `TICKSCOPE_INTERVAL=10s`.
pub const ENV_PREFIX: &str = "TICKSCOPE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Snapshots kept in memory.
    pub history: usize,

    /// Time between collection cycles.
    #[serde(with = "serde_human")]
    pub interval: Duration,

    /// Host loop ticks per second.
    pub tick_rate: f64,

    /// Set up a socket and publish once at startup.
    pub publish: bool,

    /// Filter used when `RUST_LOG` is not set.
    pub log_level: String,

    pub socket_host: String,
    pub content_url: String,
    pub viewer_url: String,
    pub user_agent: String,

    pub reconnect: ReconnectSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            history: DEFAULT_HISTORY_LENGTH,
            interval: Duration::from_secs(5),
            tick_rate: TARGET_TICK_RATE,
            publish: false,
            log_level: "info".to_string(),
            socket_host: DEFAULT_SOCKET_HOST.to_string(),
            content_url: DEFAULT_CONTENT_URL.to_string(),
            viewer_url: DEFAULT_VIEWER_URL.to_string(),
            user_agent: default_user_agent(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    #[serde(with = "serde_human")]
    pub initial_delay: Duration,
    #[serde(with = "serde_human")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_delay: policy.initial_delay,
            max_delay: policy.max_delay,
            max_attempts: policy.max_attempts,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        ReconnectPolicy {
            initial_delay: settings.initial_delay,
            max_delay: settings.max_delay,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub history: Option<usize>,
    pub interval: Option<Duration>,
    pub tick_rate: Option<f64>,
    pub publish: bool,
}

impl Settings {
    /// Defaults, then `path` if given, then `TICKSCOPE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// As [`load`](Self::load), reading environment variables under `prefix`.
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply command-line values on top.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Result<Self> {
        if let Some(history) = overrides.history {
            self.history = history;
        }
        if let Some(interval) = overrides.interval {
            self.interval = interval;
        }
        if let Some(tick_rate) = overrides.tick_rate {
            self.tick_rate = tick_rate;
        }
        self.publish |= overrides.publish;
        self.validate()?;
        Ok(self)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from(&self.reconnect)
    }

    fn validate(&self) -> Result<()> {
        if self.history == 0 {
            bail!("history must be at least 1");
        }
        if self.interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        tick_period(self.tick_rate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file() {
        let settings = Settings::load_with_prefix(None, "TICKSCOPE_TEST_DEFAULTS").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.history, 60);
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.reconnect.max_attempts, 10);
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
            history = 120
            interval = "10s"
            socket_host = "relay.internal"

            [reconnect]
            initial_delay = "500ms"
            max_attempts = 3
            "#,
        );

        let settings = Settings::load_with_prefix(Some(file.path()), "TICKSCOPE_TEST_FILE").unwrap();
        assert_eq!(settings.history, 120);
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.socket_host, "relay.internal");
        assert_eq!(settings.reconnect.initial_delay, Duration::from_millis(500));
        assert_eq!(settings.reconnect.max_attempts, 3);
        assert_eq!(settings.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(settings.tick_rate, TARGET_TICK_RATE);
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config("history = 120\ninterval = \"10s\"\n");
        std::env::set_var("TICKSCOPE_TEST_ENV_HISTORY", "30");
        std::env::set_var("TICKSCOPE_TEST_ENV_RECONNECT__MAX_ATTEMPTS", "2");

        let settings = Settings::load_with_prefix(Some(file.path()), "TICKSCOPE_TEST_ENV").unwrap();
        assert_eq!(settings.history, 30);
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.reconnect.max_attempts, 2);
    }

    #[test]
    fn flags_override_everything() {
        let settings = Settings::default()
            .with_overrides(&Overrides {
                history: Some(5),
                interval: Some(Duration::from_secs(1)),
                tick_rate: None,
                publish: true,
            })
            .unwrap();

        assert_eq!(settings.history, 5);
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.tick_rate, TARGET_TICK_RATE);
        assert!(settings.publish);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Settings::load_with_prefix(
            Some(Path::new("/nonexistent/tickscope.toml")),
            "TICKSCOPE_TEST_MISSING",
        );
        assert!(result.is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = write_config("history = 0\n");
        assert!(Settings::load_with_prefix(Some(file.path()), "TICKSCOPE_TEST_INVALID").is_err());

        let zero_rate = Overrides {
            tick_rate: Some(0.0),
            ..Overrides::default()
        };
        assert!(Settings::default().with_overrides(&zero_rate).is_err());

        let tiny_rate = Overrides {
            tick_rate: Some(1e-300),
            ..Overrides::default()
        };
        assert!(Settings::default().with_overrides(&tiny_rate).is_err());
    }
}
