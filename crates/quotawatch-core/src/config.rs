//! Runtime configuration loaded from environment variables

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{get_db_path, DB_PATH_ENV};
use crate::error::{Error, Result};
use crate::services::quota::scheduler::{
    DEFAULT_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS, MIN_TICK_INTERVAL_SECS,
};
use crate::services::quota::types::default_resource_ids;
use crate::utils::expand_path;

pub const TICK_SECS_ENV: &str = "QUOTAWATCH_TICK_SECS";
pub const RESOURCES_ENV: &str = "QUOTAWATCH_RESOURCES";
pub const NOTIFIER_ENV: &str = "QUOTAWATCH_NOTIFIER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaWatchConfig {
    pub db_path: PathBuf,
    pub tick_interval_secs: u64,
    /// Resources seeded by `init` and `initialize_missing`
    pub resources: Vec<String>,
    /// Notifier command line for the command sink; `None` logs only
    pub notifier: Option<String>,
}

impl QuotaWatchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, test map, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let db_path = match value(DB_PATH_ENV) {
            Some(path) => expand_path(&path),
            None => get_db_path()?,
        };

        let tick_interval_secs = match value(TICK_SECS_ENV) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                Error::config(format!("{} must be a whole number of seconds, got {:?}", TICK_SECS_ENV, raw))
            })?,
            None => DEFAULT_TICK_INTERVAL_SECS,
        };

        let resources = match value(RESOURCES_ENV) {
            Some(raw) => parse_resource_list(&raw),
            None => default_resource_ids(),
        };

        let config = Self {
            db_path,
            tick_interval_secs,
            resources,
            notifier: value(NOTIFIER_ENV),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_TICK_INTERVAL_SECS..=MAX_TICK_INTERVAL_SECS).contains(&self.tick_interval_secs) {
            return Err(Error::config(format!(
                "Tick interval must be between {}s and {}s",
                MIN_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS
            )));
        }
        if self.resources.is_empty() {
            return Err(Error::config("At least one resource must be configured"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

fn parse_resource_list(raw: &str) -> Vec<String> {
    let mut resources: Vec<String> = Vec::new();
    for id in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if !id.is_empty() && !resources.contains(&id) {
            resources.push(id);
        }
    }
    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            QuotaWatchConfig::from_lookup(lookup(&[(DB_PATH_ENV, "/tmp/qw.db")])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/qw.db"));
        assert_eq!(config.tick_interval_secs, DEFAULT_TICK_INTERVAL_SECS);
        assert_eq!(config.resources, default_resource_ids());
        assert!(config.notifier.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = QuotaWatchConfig::from_lookup(lookup(&[
            (DB_PATH_ENV, "/tmp/qw.db"),
            (TICK_SECS_ENV, "15"),
            (RESOURCES_ENV, "Claude, gemini,,claude"),
            (NOTIFIER_ENV, "notify-send -a quotawatch"),
        ]))
        .unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(15));
        assert_eq!(config.resources, vec!["claude".to_string(), "gemini".to_string()]);
        assert_eq!(config.notifier.as_deref(), Some("notify-send -a quotawatch"));
    }

    #[test]
    fn test_rejects_bad_tick_interval() {
        for raw in ["0", "-5", "soon", "86401", "18446744073709551615"] {
            let err = QuotaWatchConfig::from_lookup(lookup(&[
                (DB_PATH_ENV, "/tmp/qw.db"),
                (TICK_SECS_ENV, raw),
            ]))
            .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{} should be rejected", raw);
        }
    }

    #[test]
    fn test_rejects_empty_resource_list() {
        let err = QuotaWatchConfig::from_lookup(lookup(&[
            (DB_PATH_ENV, "/tmp/qw.db"),
            (RESOURCES_ENV, " , ,"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
