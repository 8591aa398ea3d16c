//! Runtime settings
//!
//! Settings are layered: built-in defaults, then an optional `ledger.toml`
//! (or the file named by `LEDGER_CONFIG`), then `LEDGER__*` environment
//! variables with `__` separating nested keys:
//!
//! ```text
//! LEDGER__BACKEND=postgres
//! LEDGER__DATABASE__URL=postgres://ledger@db/ledger
//! LEDGER__LEDGER__BONUS_ENABLED=true
//! ```

use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use domain_ledger::LedgerConfig;
use infra_db::DatabaseConfig;

/// Storage behind the ledger service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    /// Longest wait for a contended account lock
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/ledger".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 30,
            lock_timeout_ms: 5_000,
        }
    }
}

impl DatabaseSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn to_pool_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.url.clone())
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .lock_timeout(self.lock_timeout())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: Backend,
    pub database: DatabaseSettings,
    /// Fallback filter when `RUST_LOG` is unset
    pub log_level: String,
    pub log_json: bool,
    pub ledger: LedgerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            database: DatabaseSettings::default(),
            log_level: "info".to_string(),
            log_json: false,
            ledger: LedgerConfig::default(),
        }
    }
}

impl Settings {
    /// Loads `.env`, then the settings file and `LEDGER__*` variables
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = std::env::var("LEDGER_CONFIG").unwrap_or_else(|_| "ledger".to_string());

        Self::finish(
            Config::builder()
                .add_source(File::with_name(&path).required(false))
                .add_source(Environment::with_prefix("LEDGER").separator("__").try_parsing(true)),
        )
    }

    /// Parses settings from a TOML document, ignoring the environment
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Self::finish(Config::builder().add_source(File::from_str(source, FileFormat::Toml)))
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.ledger
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid ledger settings: {e}")))?;
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(format!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Money;

    #[test]
    fn test_empty_document_yields_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.ledger.estimator_cap_days, 7);
    }

    #[test]
    fn test_nested_ledger_settings() {
        let settings = Settings::from_toml(
            r#"
            backend = "memory"
            log_json = true

            [database]
            lock_timeout_ms = 250

            [ledger]
            referral_enabled = true
            reward_value = "25"
            "#,
        )
        .unwrap();

        assert_eq!(settings.backend, Backend::Memory);
        assert!(settings.log_json);
        assert_eq!(settings.database.lock_timeout(), Duration::from_millis(250));
        assert_eq!(settings.database.url, "postgres://localhost/ledger");
        assert!(settings.ledger.referral_enabled);
        assert_eq!(settings.ledger.reward_value, Money::from_units(25));
    }

    #[test]
    fn test_invalid_cap_rejected() {
        let err = Settings::from_toml("[ledger]\nestimator_cap_days = 0").unwrap_err();
        assert!(err.to_string().contains("invalid ledger settings"));
    }

    #[test]
    fn test_pool_bounds_checked() {
        let err = Settings::from_toml("[database]\nmin_connections = 20\nmax_connections = 5").unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }

    #[test]
    fn test_pool_config_carries_lock_timeout() {
        let settings = Settings::from_toml("[database]\nlock_timeout_ms = 1500").unwrap();
        let pool = settings.database.to_pool_config();
        assert_eq!(pool.lock_timeout, Duration::from_millis(1500));
        assert_eq!(pool.max_connections, 10);
    }
}
