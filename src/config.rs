//! Process configuration, read from `BOOKKEEPER_*` environment variables.
//!
//! Required variables have no sensible default and fail startup when absent.
//! Everything else falls back to the production defaults of the component it
//! configures.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::classifier::OpenAiConfig;
use crate::idempotency::CoalesceConfig;
use crate::pool::maintenance::MaintenanceConfig;
use crate::pool::{GenerationConfig, PoolConfig};
use crate::services::DEFAULT_SOURCE_URL;
use crate::store::feishu::FeishuConfig;

const PREFIX: &str = "BOOKKEEPER_";

const DEFAULT_LISTEN_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3000);
const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(String),

    #[error("invalid value {value:?} for {name}")]
    Invalid { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Shared secret for callback signatures.
    pub wechat_token: String,
    pub classifier: OpenAiConfig,
    pub feishu: FeishuConfig,
    /// Workbook holding the ledger registry and user tables.
    pub registry_container: String,
    pub ledger_table: String,
    pub user_table: String,
    pub generation: GenerationConfig,
    pub pool: PoolConfig,
    pub maintenance: MaintenanceConfig,
    pub coalesce: CoalesceConfig,
    /// Offset of the calendar that month totals and date ranges use.
    pub utc_offset: FixedOffset,
    pub source_url: String,
}

/// Typed access to prefixed variables.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", PREFIX, name)).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::Missing(format!("{}{}", PREFIX, name)))
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                name: format!("{}{}", PREFIX, name),
                value,
            }),
        }
    }

    fn millis(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        let millis = self.parsed(name, default.as_millis() as u64)?;
        Ok(Duration::from_millis(millis))
    }

    fn secs(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parsed(name, default.as_secs())?;
        Ok(Duration::from_secs(secs))
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };

        let listen_addr = vars.parsed("LISTEN_ADDR", SocketAddr::from(DEFAULT_LISTEN_ADDR))?;

        let mut classifier =
            OpenAiConfig::new(vars.required("CLASSIFIER_URL")?, vars.required("CLASSIFIER_API_KEY")?);
        if let Some(model) = vars.get("CLASSIFIER_MODEL") {
            classifier.model = model;
        }

        let mut feishu = FeishuConfig::new(vars.required("FEISHU_APP_ID")?, vars.required("FEISHU_APP_SECRET")?);
        if let Some(base_url) = vars.get("FEISHU_BASE_URL") {
            feishu.base_url = base_url;
        }

        let mut generation =
            GenerationConfig::new(vars.required("TEMPLATE_TOKEN")?, vars.required("TARGET_FOLDER")?);
        generation.copy_delay = vars.millis("COPY_DELAY_MS", generation.copy_delay)?;

        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            low_water: vars.parsed("POOL_LOW_WATER", pool_defaults.low_water)?,
            high_water: vars.parsed("POOL_HIGH_WATER", pool_defaults.high_water)?,
            batch: vars.parsed("POOL_BATCH", pool_defaults.batch)?,
        };
        if pool.low_water >= pool.high_water {
            return Err(ConfigError::Invalid {
                name: format!("{}POOL_LOW_WATER", PREFIX),
                value: pool.low_water.to_string(),
            });
        }

        let maintenance_defaults = MaintenanceConfig::default();
        let maintenance = MaintenanceConfig {
            pool_interval: vars.secs("POOL_INTERVAL_SECS", maintenance_defaults.pool_interval)?,
            cache_interval: vars.secs("CACHE_WARM_INTERVAL_SECS", maintenance_defaults.cache_interval)?,
        };

        let coalesce_defaults = CoalesceConfig::default();
        let coalesce = CoalesceConfig {
            wait_attempts: vars.parsed("COALESCE_ATTEMPTS", coalesce_defaults.wait_attempts)?,
            wait_interval: vars.millis("COALESCE_INTERVAL_MS", coalesce_defaults.wait_interval)?,
            ..coalesce_defaults
        };

        let offset_hours = vars.parsed("UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS)?;
        let utc_offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| ConfigError::Invalid {
            name: format!("{}UTC_OFFSET_HOURS", PREFIX),
            value: offset_hours.to_string(),
        })?;

        Ok(Config {
            listen_addr,
            wechat_token: vars.required("WECHAT_TOKEN")?,
            classifier,
            feishu,
            registry_container: vars.required("REGISTRY_CONTAINER")?,
            ledger_table: vars.required("LEDGER_TABLE")?,
            user_table: vars.required("USER_TABLE")?,
            generation,
            pool,
            maintenance,
            coalesce,
            utc_offset,
            source_url: vars.get("SOURCE_URL").unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const REQUIRED: [(&str, &str); 10] = [
        ("BOOKKEEPER_WECHAT_TOKEN", "wx-token"),
        ("BOOKKEEPER_CLASSIFIER_URL", "https://ai.example/v1/chat/completions"),
        ("BOOKKEEPER_CLASSIFIER_API_KEY", "sk-test"),
        ("BOOKKEEPER_FEISHU_APP_ID", "cli_app"),
        ("BOOKKEEPER_FEISHU_APP_SECRET", "secret"),
        ("BOOKKEEPER_REGISTRY_CONTAINER", "bascn_registry"),
        ("BOOKKEEPER_LEDGER_TABLE", "tbl_ledgers"),
        ("BOOKKEEPER_USER_TABLE", "tbl_users"),
        ("BOOKKEEPER_TEMPLATE_TOKEN", "bascn_template"),
        ("BOOKKEEPER_TARGET_FOLDER", "fld_target"),
    ];

    fn env(extra: &[(&str, &str)]) -> HashMap<String, String> {
        REQUIRED
            .iter()
            .chain(extra)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load(vars: &HashMap<String, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_required_set() {
        let config = load(&env(&[])).unwrap();

        assert_eq!(config.listen_addr, SocketAddr::from(([0, 0, 0, 0], 3000)));
        assert_eq!(config.wechat_token, "wx-token");
        assert_eq!(config.classifier.api_key, "sk-test");
        assert_eq!(config.classifier.model, crate::classifier::openai::DEFAULT_MODEL);
        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.maintenance, MaintenanceConfig::default());
        assert_eq!(config.coalesce, CoalesceConfig::default());
        assert_eq!(config.generation.copy_delay, Duration::from_secs(2));
        assert_eq!(config.generation.template_token, "bascn_template");
        assert_eq!(config.utc_offset.local_minus_utc(), 8 * 3600);
        assert_eq!(config.source_url, DEFAULT_SOURCE_URL);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&env(&[
            ("BOOKKEEPER_LISTEN_ADDR", "127.0.0.1:8080"),
            ("BOOKKEEPER_CLASSIFIER_MODEL", "gpt-4o-mini"),
            ("BOOKKEEPER_POOL_LOW_WATER", "2"),
            ("BOOKKEEPER_POOL_HIGH_WATER", "8"),
            ("BOOKKEEPER_POOL_BATCH", "3"),
            ("BOOKKEEPER_POOL_INTERVAL_SECS", "60"),
            ("BOOKKEEPER_COALESCE_ATTEMPTS", "3"),
            ("BOOKKEEPER_COALESCE_INTERVAL_MS", "250"),
            ("BOOKKEEPER_COPY_DELAY_MS", "0"),
            ("BOOKKEEPER_UTC_OFFSET_HOURS", "-5"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.classifier.model, "gpt-4o-mini");
        assert_eq!(
            config.pool,
            PoolConfig {
                low_water: 2,
                high_water: 8,
                batch: 3
            }
        );
        assert_eq!(config.maintenance.pool_interval, Duration::from_secs(60));
        assert_eq!(config.coalesce.wait_attempts, 3);
        assert_eq!(config.coalesce.wait_interval, Duration::from_millis(250));
        assert_eq!(config.generation.copy_delay, Duration::ZERO);
        assert_eq!(config.utc_offset.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn missing_required_variable_is_named() {
        let mut vars = env(&[]);
        vars.remove("BOOKKEEPER_WECHAT_TOKEN");
        assert_eq!(
            load(&vars).unwrap_err(),
            ConfigError::Missing("BOOKKEEPER_WECHAT_TOKEN".to_string())
        );
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut vars = env(&[]);
        vars.insert("BOOKKEEPER_USER_TABLE".to_string(), "  ".to_string());
        assert!(matches!(load(&vars), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&env(&[("BOOKKEEPER_POOL_BATCH", "ten")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "BOOKKEEPER_POOL_BATCH".to_string(),
                value: "ten".to_string()
            }
        );
    }

    #[test]
    fn inverted_water_marks_are_rejected() {
        let err = load(&env(&[
            ("BOOKKEEPER_POOL_LOW_WATER", "20"),
            ("BOOKKEEPER_POOL_HIGH_WATER", "5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let err = load(&env(&[("BOOKKEEPER_UTC_OFFSET_HOURS", "30")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
