use crate::core::model::RateSource;
use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = "ratesync/1.0";

fn default_true() -> bool {
    true
}

fn default_source_name() -> String {
    RateSource::DEFAULT_NAME.to_string()
}

fn default_base_url() -> String {
    RateSource::DEFAULT_BASE_URL.to_string()
}

fn default_target_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CurrencyConfig {
    pub code: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompanyConfig {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_target_currency")]
    pub target_currency: String,
    /// Company name; unset applies the rate globally.
    pub company: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Daily run time, evaluated at a fixed UTC offset.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        // 05:00 Lima time
        ScheduleConfig {
            hour: 5,
            minute: 0,
            utc_offset_hours: -5,
        }
    }
}

impl ScheduleConfig {
    pub fn cron_expression(&self) -> Result<String> {
        if self.hour > 23 {
            bail!("Invalid schedule hour: {}", self.hour);
        }
        if self.minute > 59 {
            bail!("Invalid schedule minute: {}", self.minute);
        }
        Ok(format!("0 {} {} * * *", self.minute, self.hour))
    }

    pub fn timezone(&self) -> Result<FixedOffset> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            bail!("Invalid schedule UTC offset: {}", self.utc_offset_hours);
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .with_context(|| format!("Invalid schedule UTC offset: {}", self.utc_offset_hours))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub data_path: Option<String>,
    /// Treat a response without `sell_price` as a failure.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub currencies: Vec<CurrencyConfig>,
    #[serde(default)]
    pub companies: Vec<CompanyConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "ratesync", "ratesync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "ratesync", "ratesync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
