use std::str::FromStr;
use std::time::Duration;

use charforge_core::tracking::{DEFAULT_MAX_POLLING_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS};
use charforge_meshy::api::{DEFAULT_AI_MODEL, DEFAULT_BASE_URL};
use charforge_meshy::MeshyConfig;

/// Tuning for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Poll attempts allowed per record before it is forced to `failed`.
    pub max_polling_attempts: i32,
    /// Sleep between cycles.
    pub poll_interval: Duration,
    /// Upper bound on a single provider call.
    pub provider_timeout: Duration,
    /// Upper bound on a single store query or update.
    pub store_timeout: Duration,
    /// Records polled concurrently within one cycle.
    pub poll_concurrency: usize,
    /// How long `stop()` waits for the loop before aborting it.
    pub shutdown_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_polling_attempts: DEFAULT_MAX_POLLING_ATTEMPTS,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            provider_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
            poll_concurrency: 4,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string. Only the binary requires it.
    pub database_url: Option<String>,
    pub tracker: TrackerConfig,
    pub meshy: MeshyConfig,
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Default                            |
    /// |-------------------------|------------------------------------|
    /// | `DATABASE_URL`          | unset                              |
    /// | `MESHY_API_KEY`         | unset                              |
    /// | `MESHY_API_URL`         | `https://api.meshy.ai/openapi/v1`  |
    /// | `MESHY_AI_MODEL`        | `meshy-5`                          |
    /// | `MAX_POLLING_ATTEMPTS`  | `120`                              |
    /// | `POLL_INTERVAL_SECS`    | `10`                               |
    /// | `PROVIDER_TIMEOUT_SECS` | `30`                               |
    /// | `STORE_TIMEOUT_SECS`    | `10`                               |
    /// | `POLL_CONCURRENCY`      | `4`                                |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TrackerConfig::default();

        let max_polling_attempts: i32 = parse_var(
            &lookup,
            "MAX_POLLING_ATTEMPTS",
            defaults.max_polling_attempts,
            "positive integer",
        )?;
        if max_polling_attempts <= 0 {
            return Err(ConfigError::Zero("MAX_POLLING_ATTEMPTS"));
        }

        let poll_interval_secs: u64 = parse_var(
            &lookup,
            "POLL_INTERVAL_SECS",
            defaults.poll_interval.as_secs(),
            "u64",
        )?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::Zero("POLL_INTERVAL_SECS"));
        }

        let provider_timeout_secs: u64 = parse_var(
            &lookup,
            "PROVIDER_TIMEOUT_SECS",
            defaults.provider_timeout.as_secs(),
            "u64",
        )?;
        if provider_timeout_secs == 0 {
            return Err(ConfigError::Zero("PROVIDER_TIMEOUT_SECS"));
        }

        let store_timeout_secs: u64 = parse_var(
            &lookup,
            "STORE_TIMEOUT_SECS",
            defaults.store_timeout.as_secs(),
            "u64",
        )?;
        if store_timeout_secs == 0 {
            return Err(ConfigError::Zero("STORE_TIMEOUT_SECS"));
        }

        let poll_concurrency: usize = parse_var(
            &lookup,
            "POLL_CONCURRENCY",
            defaults.poll_concurrency,
            "usize",
        )?;
        if poll_concurrency == 0 {
            return Err(ConfigError::Zero("POLL_CONCURRENCY"));
        }

        let shutdown_timeout_secs: u64 = parse_var(
            &lookup,
            "SHUTDOWN_TIMEOUT_SECS",
            defaults.shutdown_timeout.as_secs(),
            "u64",
        )?;

        let provider_timeout = Duration::from_secs(provider_timeout_secs);

        let meshy = MeshyConfig {
            api_key: non_empty(lookup("MESHY_API_KEY")),
            base_url: non_empty(lookup("MESHY_API_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ai_model: non_empty(lookup("MESHY_AI_MODEL"))
                .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            request_timeout: provider_timeout,
        };

        Ok(Self {
            database_url: non_empty(lookup("DATABASE_URL")),
            tracker: TrackerConfig {
                max_polling_attempts,
                poll_interval: Duration::from_secs(poll_interval_secs),
                provider_timeout,
                store_timeout: Duration::from_secs(store_timeout_secs),
                poll_concurrency,
                shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            },
            meshy,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T, F>(
    lookup: &F,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup(var)) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        }),
    }
}
