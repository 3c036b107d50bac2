use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const DEFAULT_REFRESH_INTERVAL: u64 = 5;
const DEFAULT_ALERT_INTERVAL: u64 = 300;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HoldingSpec {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub held_shares: u64,
    #[serde(default = "default_min_percentage", with = "rust_decimal::serde::float")]
    pub min_percentage: Decimal,
    #[serde(default = "default_max_percentage", with = "rust_decimal::serde::float")]
    pub max_percentage: Decimal,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub net_value: Option<Decimal>,
}

impl HoldingSpec {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.code
        } else {
            &self.name
        }
    }
}

fn default_min_percentage() -> Decimal {
    dec!(0)
}

fn default_max_percentage() -> Decimal {
    dec!(100)
}

fn default_alert_interval() -> u64 {
    DEFAULT_ALERT_INTERVAL
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    pub refresh_interval_seconds: u64,
    #[serde(default = "default_alert_interval")]
    pub alert_interval_seconds: u64,
    pub notification_enabled: bool,
    #[serde(default)]
    pub send_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: DEFAULT_REFRESH_INTERVAL,
            alert_interval_seconds: DEFAULT_ALERT_INTERVAL,
            notification_enabled: true,
            send_key: String::new(),
        }
    }
}

impl Settings {
    // a zero interval would spin the loop during trading hours
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.alert_interval_seconds.max(1))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MonitorConfig {
    pub settings: Settings,
    #[serde(default)]
    pub portfolio: Vec<HoldingSpec>,
}

/// Settings as exposed over the API, without the push gateway key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PublicSettings {
    pub refresh_interval_seconds: u64,
    pub alert_interval_seconds: u64,
    pub notification_enabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PublicConfig {
    pub settings: PublicSettings,
    pub portfolio: Vec<HoldingSpec>,
}

impl From<&MonitorConfig> for PublicConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            settings: PublicSettings {
                refresh_interval_seconds: config.settings.refresh_interval_seconds,
                alert_interval_seconds: config.settings.alert_interval_seconds,
                notification_enabled: config.settings.notification_enabled,
            },
            portfolio: config.portfolio.clone(),
        }
    }
}

/// Source of the monitor configuration, re-read by the monitor on every cycle.
pub trait ConfigProvider {
    fn get_config(&self) -> impl Future<Output = Result<MonitorConfig>> + Send;
}

/// In-memory configuration backed by a JSON document on disk.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Arc<RwLock<MonitorConfig>>,
}

impl ConfigStore {
    /// Loads the document at `path`. A missing file is created with the
    /// default configuration; an unreadable one falls back to the default
    /// in memory and is left untouched.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let config = match tokio::fs::try_exists(&path).await {
            Ok(true) => match read_config(&path).await {
                Ok(config) => {
                    info!(
                        "Loaded config from {} ({} holdings)",
                        path.display(),
                        config.portfolio.len()
                    );
                    config
                }
                Err(err) => {
                    error!("Failed to load config : {:#}", err);
                    MonitorConfig::default()
                }
            },
            Ok(false) => {
                let config = MonitorConfig::default();
                info!("No config at {}, writing defaults", path.display());
                if let Err(err) = write_config(&path, &config).await {
                    error!("Failed to save config : {:#}", err);
                }
                config
            }
            Err(err) => {
                error!("Failed to access {} : {}", path.display(), err);
                MonitorConfig::default()
            }
        };

        Self {
            path,
            current: Arc::from(RwLock::from(config)),
        }
    }

    pub async fn get(&self) -> MonitorConfig {
        self.current.read().await.clone()
    }

    /// Replaces the configuration and persists it. An empty `send_key` keeps
    /// the stored one so clients that only see the public view cannot wipe it.
    /// Persistence failures are logged; the new configuration stays active.
    pub async fn set(&self, mut config: MonitorConfig) -> MonitorConfig {
        let mut current = self.current.write().await;
        if config.settings.send_key.is_empty() {
            config.settings.send_key = current.settings.send_key.clone();
        }
        *current = config.clone();
        drop(current);

        if let Err(err) = write_config(&self.path, &config).await {
            error!("Failed to save config : {:#}", err);
        }
        config
    }
}

impl ConfigProvider for ConfigStore {
    async fn get_config(&self) -> Result<MonitorConfig> {
        Ok(self.get().await)
    }
}

/// Reads the document at `path` without writing anything. A missing file
/// yields the default configuration, an invalid one is an error.
pub async fn read_or_default(path: &Path) -> Result<MonitorConfig> {
    if !tokio::fs::try_exists(path).await? {
        info!("No config at {}, using defaults", path.display());
        return Ok(MonitorConfig::default());
    }
    read_config(path).await
}

async fn read_config(path: &Path) -> Result<MonitorConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Could not read {}", path.display()))?;
    let config: MonitorConfig = serde_json::de::from_str(&raw)
        .with_context(|| format!("Invalid config document {}", path.display()))?;

    for holding in config
        .portfolio
        .iter()
        .filter(|h| h.min_percentage > h.max_percentage)
    {
        warn!(
            "{} has min {}% above max {}%",
            holding.code, holding.min_percentage, holding.max_percentage
        );
    }

    Ok(config)
}

async fn write_config(path: &Path, config: &MonitorConfig) -> Result<()> {
    let json = serde_json::ser::to_string_pretty(config)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Could not write {}", path.display()))?;
    Ok(())
}
