//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Application configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    /// Bot transport configuration.
    #[validate(nested)]
    pub bot: BotConfig,
    /// Database configuration.
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// Moderation policy configuration.
    #[serde(default)]
    #[validate(nested)]
    pub moderation: ModerationConfig,
    /// Background sweep configuration.
    #[serde(default)]
    #[validate(nested)]
    pub scheduler: SchedulerSettings,
    /// Enforcement retry configuration.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,
}

/// Bot transport configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BotConfig {
    /// Bot API token.
    #[validate(length(min = 1))]
    pub token: String,
    /// Base URL of the Bot API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-poll timeout for update fetching, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// HTTP request timeout, in seconds. Must exceed the poll timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    #[validate(length(min = 1))]
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Moderation policy configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModerationConfig {
    /// Warnings that trigger an automatic ban.
    #[serde(default = "default_warn_threshold")]
    #[validate(range(min = 1))]
    pub warn_threshold: u32,
    /// Lifetime of an idle admin panel session, in seconds.
    #[serde(default = "default_session_ttl")]
    #[validate(range(min = 1))]
    pub session_ttl_secs: u64,
    /// Mute duration used when none is given, in seconds.
    #[serde(default = "default_mute_secs")]
    #[validate(range(min = 1))]
    pub default_mute_secs: u64,
    /// Number of processed event ids cached in memory for de-duplication.
    #[serde(default = "default_dedup_capacity")]
    #[validate(range(min = 1))]
    pub dedup_capacity: usize,
    /// How long handled event outcomes are kept for de-duplication, in seconds.
    #[serde(default = "default_dedup_retention")]
    #[validate(range(min = 1))]
    pub dedup_retention_secs: u64,
    /// Timeout for a single enforcement call, in milliseconds.
    #[serde(default = "default_enforcement_timeout")]
    #[validate(range(min = 1))]
    pub enforcement_timeout_ms: u64,
    /// Idle time after which a per-chat worker is retired, in seconds.
    #[serde(default = "default_chat_idle_timeout")]
    pub chat_idle_timeout_secs: u64,
}

/// Background sweep configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SchedulerSettings {
    /// Interval between expired-mute sweeps, in seconds.
    #[serde(default = "default_sweep_interval")]
    #[validate(range(min = 1))]
    pub mute_sweep_interval_secs: u64,
    /// Interval between expired-session sweeps, in seconds.
    #[serde(default = "default_sweep_interval")]
    #[validate(range(min = 1))]
    pub session_sweep_interval_secs: u64,
    /// Interval between store compactions, in seconds.
    #[serde(default = "default_compaction_interval")]
    #[validate(range(min = 1))]
    pub compaction_interval_secs: u64,
}

/// Enforcement retry configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RetrySettings {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial delay between retries, in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_multiplier")]
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

const fn default_poll_timeout() -> u64 {
    30
}

const fn default_request_timeout() -> u64 {
    40
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_warn_threshold() -> u32 {
    3
}

const fn default_session_ttl() -> u64 {
    300
}

const fn default_mute_secs() -> u64 {
    3600
}

const fn default_dedup_capacity() -> usize {
    10_000
}

const fn default_dedup_retention() -> u64 {
    7 * 24 * 3600
}

const fn default_enforcement_timeout() -> u64 {
    5_000
}

const fn default_chat_idle_timeout() -> u64 {
    300
}

const fn default_sweep_interval() -> u64 {
    30
}

const fn default_compaction_interval() -> u64 {
    3600
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_initial_delay() -> u64 {
    1_000
}

const fn default_max_delay() -> u64 {
    60_000
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            warn_threshold: default_warn_threshold(),
            session_ttl_secs: default_session_ttl(),
            default_mute_secs: default_mute_secs(),
            dedup_capacity: default_dedup_capacity(),
            dedup_retention_secs: default_dedup_retention(),
            enforcement_timeout_ms: default_enforcement_timeout(),
            chat_idle_timeout_secs: default_chat_idle_timeout(),
        }
    }
}

impl ModerationConfig {
    /// Admin panel session lifetime.
    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Mute duration used when a command omits one.
    #[must_use]
    pub const fn default_mute(&self) -> Duration {
        Duration::from_secs(self.default_mute_secs)
    }

    /// Retention of handled event outcomes.
    #[must_use]
    pub const fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }

    /// Per-call enforcement timeout.
    #[must_use]
    pub const fn enforcement_timeout(&self) -> Duration {
        Duration::from_millis(self.enforcement_timeout_ms)
    }

    /// Idle time after which a per-chat worker is retired.
    #[must_use]
    pub const fn chat_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_idle_timeout_secs)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            mute_sweep_interval_secs: default_sweep_interval(),
            session_sweep_interval_secs: default_sweep_interval(),
            compaction_interval_secs: default_compaction_interval(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` file (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `WARDEN_ENV`)
    /// 4. Environment variables with `WARDEN__` prefix
    pub fn load() -> Result<Self, crate::AppError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string());

        let config: Self = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        tracing::debug!(env = %env, "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, crate::AppError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config = parse(
            r#"
            [bot]
            token = "123:abc"

            [database]
            url = "postgres://localhost/warden"
            "#,
        );

        assert_eq!(config.bot.api_url, "https://api.telegram.org");
        assert_eq!(config.moderation.warn_threshold, 3);
        assert_eq!(config.scheduler.mute_sweep_interval_secs, 30);
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_fails_validation() {
        let config = parse(
            r#"
            [bot]
            token = "123:abc"

            [database]
            url = "postgres://localhost/warden"

            [moderation]
            warn_threshold = 0
            "#,
        );

        assert!(config.validate().is_err());
    }
}
