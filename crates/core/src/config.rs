//! Process configuration loaded from environment variables.
//!
//! Read once at startup and treated as immutable for the lifetime of the
//! process. All fields have defaults suitable for local development; in
//! production, override via environment variables.

use std::fmt;
use std::str::FromStr;

/// Operating mode of this process.
///
/// Several queue operations are valid only under [`InstanceRole::Worker`];
/// calling them on a dispatcher is a programming error, not a runtime fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    /// Submits jobs to the shared queue and awaits their responses.
    Dispatcher,
    /// Pulls jobs from the shared queue and executes them.
    Worker,
}

impl FromStr for InstanceRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dispatcher" => Ok(Self::Dispatcher),
            "worker" => Ok(Self::Worker),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }
}

impl fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatcher => write!(f, "dispatcher"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Configuration for the queue orchestration layer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Role of this process (default: `dispatcher`).
    pub role: InstanceRole,
    /// Namespace prefix for all queue keys (default: `jobs`).
    pub queue_prefix: String,
    /// Broker connection string, passed through to the transport opaquely
    /// (default: `redis://localhost:6379`).
    pub broker_url: String,
    /// Cumulative connection-outage budget in milliseconds before the
    /// process escalates and exits (default: `10000`).
    pub outage_budget_ms: u64,
    /// Number of jobs a worker processes concurrently (default: `10`).
    pub worker_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                  |
    /// |----------------------|--------------------------|
    /// | `INSTANCE_ROLE`      | `dispatcher`             |
    /// | `QUEUE_PREFIX`       | `jobs`                   |
    /// | `BROKER_URL`         | `redis://localhost:6379` |
    /// | `OUTAGE_BUDGET_MS`   | `10000`                  |
    /// | `WORKER_CONCURRENCY` | `10`                     |
    pub fn from_env() -> Self {
        let role: InstanceRole = std::env::var("INSTANCE_ROLE")
            .unwrap_or_else(|_| "dispatcher".into())
            .parse()
            .expect("INSTANCE_ROLE must be `dispatcher` or `worker`");

        let queue_prefix = std::env::var("QUEUE_PREFIX").unwrap_or_else(|_| "jobs".into());

        let broker_url =
            std::env::var("BROKER_URL").unwrap_or_else(|_| "redis://localhost:6379".into());

        let outage_budget_ms: u64 = std::env::var("OUTAGE_BUDGET_MS")
            .unwrap_or_else(|_| "10000".into())
            .parse()
            .expect("OUTAGE_BUDGET_MS must be a valid u64");

        let worker_concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");

        Self {
            role,
            queue_prefix,
            broker_url,
            outage_budget_ms,
            worker_concurrency,
        }
    }
}

/// Normalise and validate a queue namespace prefix.
///
/// Rules:
/// - Must not be empty after trimming.
/// - Must not contain whitespace.
/// - Must not contain `:` (the transport appends its own key separator).
pub fn validate_prefix(raw: &str) -> Result<String, ConfigError> {
    let prefix = raw.trim();

    if prefix.is_empty() {
        return Err(ConfigError::InvalidPrefix(
            "prefix must not be empty".to_string(),
        ));
    }

    if prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidPrefix(format!(
            "prefix `{prefix}` must not contain whitespace"
        )));
    }

    if prefix.contains(':') {
        return Err(ConfigError::InvalidPrefix(format!(
            "prefix `{prefix}` must not contain `:`"
        )));
    }

    Ok(prefix.to_string())
}

/// Errors raised while reading or validating configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// `INSTANCE_ROLE` was neither `dispatcher` nor `worker`.
    #[error("Unknown instance role `{0}`, expected `dispatcher` or `worker`")]
    InvalidRole(String),

    /// The queue namespace prefix failed validation.
    #[error("Invalid queue prefix: {0}")]
    InvalidPrefix(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(
            "Worker".parse::<InstanceRole>().unwrap(),
            InstanceRole::Worker
        );
        assert_eq!(
            " dispatcher ".parse::<InstanceRole>().unwrap(),
            InstanceRole::Dispatcher
        );
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("webhook".parse::<InstanceRole>().is_err());
    }

    #[test]
    fn prefix_is_trimmed() {
        assert_eq!(validate_prefix("  jobs  ").unwrap(), "jobs");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(validate_prefix("   ").is_err());
    }

    #[test]
    fn prefix_with_separator_is_rejected() {
        assert!(validate_prefix("jobs:prod").is_err());
        assert!(validate_prefix("my jobs").is_err());
    }
}
