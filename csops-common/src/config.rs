//! Configuration loading
//!
//! Resolution priority (highest first):
//! 1. Command-line arguments (applied by the server binary)
//! 2. Environment variables (`CSOPS_*`)
//! 3. TOML config file
//! 4. Built-in defaults
//!
//! Integration sections are optional: a missing section disables the
//! integration and the matching endpoints answer 503.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CSOPS_CONFIG";

/// Full service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub database_path: PathBuf,
    pub log_level: String,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub invite_ttl_days: i64,
    pub adoption_check_delay_days: i64,
    pub scheduler_interval_secs: u64,
    pub max_upload_bytes: usize,
    pub storage: Option<StorageConfig>,
    pub calcom: Option<CalComConfig>,
    pub calendly: Option<CalendlyConfig>,
    pub fathom: Option<FathomConfig>,
    pub openai: Option<OpenAiConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5740".to_string(),
            database_path: default_database_path(),
            log_level: "info".to_string(),
            jwt_secret: String::new(),
            token_ttl_hours: 12,
            invite_ttl_days: 7,
            adoption_check_delay_days: 30,
            scheduler_interval_secs: 300,
            max_upload_bytes: 25 * 1024 * 1024,
            storage: None,
            calcom: None,
            calendly: None,
            fathom: None,
            openai: None,
        }
    }
}

/// S3-compatible object storage (AWS S3 or Cloudflare R2)
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint, e.g. `https://<account>.r2.cloudflarestorage.com`
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalComConfig {
    pub api_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_calcom_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendlyConfig {
    pub api_token: String,
    pub webhook_signing_key: String,
    pub organization_uri: Option<String>,
    #[serde(default = "default_calendly_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FathomConfig {
    pub api_key: String,
    #[serde(default = "default_fathom_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_presign_ttl() -> u64 {
    900
}

fn default_calcom_url() -> String {
    "https://api.cal.com/v2".to_string()
}

fn default_calendly_url() -> String {
    "https://api.calendly.com".to_string()
}

fn default_fathom_url() -> String {
    "https://api.fathom.ai/external/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("csops").join("csops.db"))
        .unwrap_or_else(|| PathBuf::from("./csops_data/csops.db"))
}

/// Default config file location (`~/.config/csops/config.toml`)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("csops").join("config.toml"))
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load from an explicit file, or the default location if it exists.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file yields built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)
            }
            None => match default_config_file().filter(|p| p.exists()) {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)?;
                    info!("Loaded configuration from {}", path.display());
                    Self::from_toml_str(&content)
                }
                None => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Apply `CSOPS_*` overrides from a variable lookup.
    ///
    /// Takes a lookup function so tests don't have to mutate the process
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CSOPS_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = lookup("CSOPS_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CSOPS_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("CSOPS_JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = lookup("CSOPS_TOKEN_TTL_HOURS") {
            self.token_ttl_hours = parse_env("CSOPS_TOKEN_TTL_HOURS", &v)?;
        }
        if let Some(v) = lookup("CSOPS_INVITE_TTL_DAYS") {
            self.invite_ttl_days = parse_env("CSOPS_INVITE_TTL_DAYS", &v)?;
        }
        if let Some(v) = lookup("CSOPS_ADOPTION_CHECK_DELAY_DAYS") {
            self.adoption_check_delay_days = parse_env("CSOPS_ADOPTION_CHECK_DELAY_DAYS", &v)?;
        }
        if let Some(v) = lookup("CSOPS_SCHEDULER_INTERVAL_SECS") {
            self.scheduler_interval_secs = parse_env("CSOPS_SCHEDULER_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("CSOPS_OPENAI_API_KEY") {
            match self.openai.as_mut() {
                Some(openai) => openai.api_key = v,
                None => {
                    self.openai = Some(OpenAiConfig {
                        api_key: v,
                        model: default_openai_model(),
                        base_url: default_openai_url(),
                    })
                }
            }
        }
        if let Some(v) = lookup("CSOPS_FATHOM_API_KEY") {
            match self.fathom.as_mut() {
                Some(fathom) => fathom.api_key = v,
                None => {
                    self.fathom = Some(FathomConfig {
                        api_key: v,
                        base_url: default_fathom_url(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Check values that would otherwise fail later at runtime
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(Error::Config(
                "jwt_secret is required (set CSOPS_JWT_SECRET or jwt_secret in config.toml)"
                    .to_string(),
            ));
        }
        if self.token_ttl_hours <= 0 {
            return Err(Error::Config("token_ttl_hours must be positive".to_string()));
        }
        if self.invite_ttl_days <= 0 {
            return Err(Error::Config("invite_ttl_days must be positive".to_string()));
        }
        if self.adoption_check_delay_days < 0 {
            return Err(Error::Config(
                "adoption_check_delay_days must not be negative".to_string(),
            ));
        }
        if self.scheduler_interval_secs == 0 {
            return Err(Error::Config(
                "scheduler_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address, "127.0.0.1:5740");
        assert_eq!(config.invite_ttl_days, 7);
        assert_eq!(config.adoption_check_delay_days, 30);
        assert!(config.storage.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CSOPS_JWT_SECRET", "from-env"),
            ("CSOPS_ADOPTION_CHECK_DELAY_DAYS", "14"),
            ("CSOPS_OPENAI_API_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.jwt_secret, "from-env");
        assert_eq!(config.adoption_check_delay_days, 14);
        let openai = config.openai.unwrap();
        assert_eq!(openai.api_key, "sk-test");
        assert_eq!(openai.model, "gpt-4o-mini");
    }

    #[test]
    fn test_env_bad_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "CSOPS_TOKEN_TTL_HOURS").then(|| "twelve".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_requires_secret() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
        config.jwt_secret = "s3cret".to_string();
        assert!(config.validate().is_ok());
    }
}
