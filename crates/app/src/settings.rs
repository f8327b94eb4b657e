//! Handles settings for the worker. Configuration is read from
//! `config/spendsync.toml` when present and overridden by `SPENDSYNC__*`
//! environment variables (e.g. `SPENDSYNC__QUEUE__NAME`).
//!
//! The mode is chosen by `WORKER_LOCAL` alone: `true` runs the pull loop,
//! anything else serves the push endpoint.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use dispatch::{DependencySettings, pull::PullSettings};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "config/spendsync";
const WORKER_LOCAL: &str = "WORKER_LOCAL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Database {
    pub url: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "sqlite:./spendsync.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Queue {
    pub name: String,
    pub visibility_timeout_secs: u64,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            name: String::new(),
            visibility_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Push {
    pub bind: String,
    pub port: u16,
}

impl Default for Push {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pull {
    pub max_messages: usize,
    pub wait_time_secs: u64,
    pub error_backoff_secs: u64,
}

impl Default for Pull {
    fn default() -> Self {
        let defaults = PullSettings::default();
        Self {
            max_messages: defaults.max_messages,
            wait_time_secs: defaults.wait_time.as_secs(),
            error_backoff_secs: defaults.error_backoff.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub queue: Queue,
    pub push: Push,
    pub pull: Pull,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false))
            .add_source(Environment::with_prefix("SPENDSYNC").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Pull mode reads the queue itself and therefore needs its name; push
    /// mode never resolves it.
    pub fn dependencies(&self, pull: bool) -> DependencySettings {
        DependencySettings {
            database_url: self.database.url.clone(),
            queue_name: pull.then(|| self.queue.name.clone()),
            visibility_timeout: Duration::from_secs(self.queue.visibility_timeout_secs),
        }
    }

    pub fn pull_settings(&self) -> PullSettings {
        PullSettings {
            max_messages: self.pull.max_messages,
            wait_time: Duration::from_secs(self.pull.wait_time_secs),
            error_backoff: Duration::from_secs(self.pull.error_backoff_secs),
        }
    }
}

/// Whether `WORKER_LOCAL` asks for pull mode.
pub fn worker_local() -> bool {
    parse_flag(std::env::var(WORKER_LOCAL).ok().as_deref())
}

fn parse_flag(value: Option<&str>) -> bool {
    value.is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_true_only_for_true() {
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some(" TRUE ")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(Some("1")));
        assert!(!parse_flag(Some("")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn push_mode_does_not_resolve_the_queue() {
        let settings = Settings::default();
        assert_eq!(settings.dependencies(false).queue_name, None);
        assert_eq!(
            settings.dependencies(true).queue_name,
            Some(String::new())
        );
    }

    #[test]
    fn pull_defaults() {
        let pull = Settings::default().pull_settings();
        assert_eq!(pull.max_messages, 10);
        assert_eq!(pull.wait_time, Duration::from_secs(10));
        assert_eq!(pull.error_backoff, Duration::from_secs(5));
    }
}
