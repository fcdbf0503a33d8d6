use std::{env, sync::Arc};

#[derive(Clone, Debug)]
/// Configuration struct for the engine.
///
/// Holds everything needed to wire the stores, the scheduler and the HTTP
/// surface. Optional backends fall back to in-process implementations when
/// their URL is not set.
pub struct Config {
    // environment
    pub environment: String, // development or production
    /// The URL of the database to connect to. `None` selects the in-memory stores.
    pub database_url: Option<String>,
    /// The URL of the Redis server used for sweep run-locks. `None` selects a local lock.
    pub redis_url: Option<String>,
    /// The hostname or IP address the server will bind to.
    pub server_host: String,
    /// The port number the server will listen on.
    pub server_port: u16,
    /// The number of worker threads to spawn for handling requests.
    pub num_workers: usize,
    /// A boolean indicating whether console logging is enabled.
    pub console_logging_enabled: bool,
    /// File the logger mirrors its output to.
    pub log_file: String,
    /// Stripe secret key. Empty means payments are accepted without a provider.
    pub stripe_secret_key: String,
    /// Scheduler configuration.
    pub scheduler: SchedulerConfig,
}

#[derive(Clone, Debug)]
/// Timing knobs for the reconciliation scheduler.
pub struct SchedulerConfig {
    /// How often the scheduler wakes up to look for due sweeps, in seconds.
    pub tick_secs: u64,
    /// Upper bound a sweep may hold its run-lock before it is considered abandoned.
    pub lock_ttl_secs: u64,
    /// Subscriptions ending within this many days get a renewal reminder.
    pub renewal_reminder_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_secs: 30,
            lock_ttl_secs: 3600,
            renewal_reminder_days: 3,
        }
    }
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    ///
    /// Loads `.env` first (if present) and then reads the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `ENVIRONMENT`: development or production (default: "development")
    /// - `DATABASE_URL`: PostgreSQL connection string (default: in-memory stores)
    /// - `REDIS_URL`: Redis connection string (default: local run-lock)
    /// - `IP`: Server host (default: "127.0.0.1")
    /// - `PORT`: Server port (default: 8080)
    /// - `WORKERS`: Number of worker threads (default: 4)
    /// - `ENABLE_CONSOLE_LOGGING`: Whether to enable console logging (default: true)
    /// - `LOG_FILE`: Log file path (default: "entitlements.log")
    /// - `STRIPE_SECRET_KEY`: Stripe secret key (default: empty)
    /// - `SCHEDULER_TICK_SECS`, `SWEEP_LOCK_TTL_SECS`, `RENEWAL_REMINDER_DAYS`
    pub fn from_env() -> Arc<Self> {
        dotenvy::dotenv().ok();
        Arc::new(Self::from_lookup(|key| env::var(key).ok()))
    }

    /// Builds the configuration from an arbitrary key lookup.
    /// Unparseable numeric values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = SchedulerConfig::default();

        Config {
            environment: non_empty("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            server_host: non_empty("IP").unwrap_or_else(|| "127.0.0.1".to_string()),
            server_port: non_empty("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            num_workers: non_empty("WORKERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            console_logging_enabled: non_empty("ENABLE_CONSOLE_LOGGING")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            log_file: non_empty("LOG_FILE").unwrap_or_else(|| "entitlements.log".to_string()),
            stripe_secret_key: lookup("STRIPE_SECRET_KEY").unwrap_or_default(),
            scheduler: SchedulerConfig {
                tick_secs: non_empty("SCHEDULER_TICK_SECS")
                    .and_then(|v| v.parse().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(defaults.tick_secs),
                lock_ttl_secs: non_empty("SWEEP_LOCK_TTL_SECS")
                    .and_then(|v| v.parse().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(defaults.lock_ttl_secs),
                renewal_reminder_days: non_empty("RENEWAL_REMINDER_DAYS")
                    .and_then(|v| v.parse().ok())
                    .filter(|v| *v >= 0)
                    .unwrap_or(defaults.renewal_reminder_days),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_select_in_process_backends() {
        let config = config_from(&[]);
        assert_eq!(config.environment, "development");
        assert!(config.database_url.is_none());
        assert!(config.redis_url.is_none());
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.scheduler.tick_secs, 30);
        assert_eq!(config.scheduler.renewal_reminder_days, 3);
        assert!(config.console_logging_enabled);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = config_from(&[
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "postgres://u:p@db/app"),
            ("PORT", "9090"),
            ("ENABLE_CONSOLE_LOGGING", "FALSE"),
            ("SCHEDULER_TICK_SECS", "5"),
        ]);
        assert!(config.is_production());
        assert_eq!(config.database_url.as_deref(), Some("postgres://u:p@db/app"));
        assert_eq!(config.server_port, 9090);
        assert!(!config.console_logging_enabled);
        assert_eq!(config.scheduler.tick_secs, 5);
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let config = config_from(&[("WORKERS", "many"), ("SCHEDULER_TICK_SECS", "0")]);
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.scheduler.tick_secs, 30);
    }
}
