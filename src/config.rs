use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const PREFETCH_KEY: &str = "CHATGATE_PREFETCH";
pub const WORKERS_KEY: &str = "CHATGATE_WORKERS";
pub const WARN_AFTER_KEY: &str = "CHATGATE_WARN_AFTER_SECS";
pub const ESCALATE_AFTER_KEY: &str = "CHATGATE_ESCALATE_AFTER_ATTEMPTS";
pub const LIVE_ACTIVITY_CAPACITY_KEY: &str = "CHATGATE_LIVE_ACTIVITY_CAPACITY";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum number of unconsumed messages on the event and response queues.
    pub prefetch: usize,
    pub workers: usize,
    pub diagnostics: DiagnosticsConfig,
    pub live_activity_capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsConfig {
    /// Episodes running longer than this get a "please wait" notice.
    pub warn_after: Duration,
    /// Rejected attempts within one episode before the escalation notice.
    pub escalate_after_attempts: u32,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            warn_after: Duration::from_secs(5),
            escalate_after_attempts: 3,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Completely uninformed value. Adjust as needed.
            prefetch: 100,
            workers: 4,
            diagnostics: DiagnosticsConfig::default(),
            live_activity_capacity: 1024,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment, after loading a
    /// `.env` file if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::info!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            prefetch: parse_positive(&lookup, PREFETCH_KEY, defaults.prefetch)?,
            workers: parse_positive(&lookup, WORKERS_KEY, defaults.workers)?,
            diagnostics: DiagnosticsConfig {
                warn_after: Duration::from_secs(parse(
                    &lookup,
                    WARN_AFTER_KEY,
                    defaults.diagnostics.warn_after.as_secs(),
                )?),
                escalate_after_attempts: parse(
                    &lookup,
                    ESCALATE_AFTER_KEY,
                    defaults.diagnostics.escalate_after_attempts,
                )?,
            },
            live_activity_capacity: parse_positive(
                &lookup,
                LIVE_ACTIVITY_CAPACITY_KEY,
                defaults.live_activity_capacity,
            )?,
        };
        Ok(config)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: value.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
