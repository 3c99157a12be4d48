use chrono::{FixedOffset, Offset, Utc};
use cron::Schedule;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub queue_namespace: String,
    pub worker_concurrency: usize,
    pub probe_timeout_seconds: u64,
    pub scan_schedule: String,
    pub check_lease_seconds: u64,
    pub task_lease_seconds: u64,
    pub alert_utc_offset: FixedOffset,
    pub app_scheme: String,
    pub app_domain: String,
    pub mail_webhook_url: Option<String>,
    pub mail_webhook_body_template: Option<String>,
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialAppConfig {
    database_url: Option<String>,
    redis_url: Option<String>,
    queue_namespace: Option<String>,
    worker_concurrency: Option<usize>,
    probe_timeout_seconds: Option<u64>,
    scan_schedule: Option<String>,
    check_lease_seconds: Option<u64>,
    task_lease_seconds: Option<u64>,
    alert_utc_offset: Option<String>,
    app_scheme: Option<String>,
    app_domain: Option<String>,
    mail_webhook_url: Option<String>,
    mail_webhook_body_template: Option<String>,
    log_dir: Option<String>,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_queue_namespace() -> String {
    "uptimatic".to_string()
}

fn default_scan_schedule() -> String {
    // Every minute, on the minute.
    "0 * * * * *".to_string()
}

fn default_alert_utc_offset() -> String {
    "+07:00".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AppConfig {
    /// Loads the configuration from an optional TOML file and the environment.
    /// Environment variables override values found in the file.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config: PartialAppConfig = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let contents = fs::read_to_string(path_str).map_err(|source| ConfigError::Read {
                    path: path_str.to_string(),
                    source,
                })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path_str.to_string(),
                    source,
                })?
            }
            _ => PartialAppConfig::default(),
        };

        let env_config: PartialAppConfig = envy::from_env::<PartialAppConfig>()?;

        Self::merge(env_config, file_config)
    }

    fn merge(env: PartialAppConfig, file: PartialAppConfig) -> Result<Self, ConfigError> {
        let offset_str = env
            .alert_utc_offset
            .or(file.alert_utc_offset)
            .unwrap_or_else(default_alert_utc_offset);

        let config = AppConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            redis_url: env.redis_url.or(file.redis_url).unwrap_or_else(default_redis_url),
            queue_namespace: env
                .queue_namespace
                .or(file.queue_namespace)
                .unwrap_or_else(default_queue_namespace),
            worker_concurrency: env
                .worker_concurrency
                .or(file.worker_concurrency)
                .unwrap_or(10),
            probe_timeout_seconds: env
                .probe_timeout_seconds
                .or(file.probe_timeout_seconds)
                .unwrap_or(30),
            scan_schedule: env
                .scan_schedule
                .or(file.scan_schedule)
                .unwrap_or_else(default_scan_schedule),
            check_lease_seconds: env
                .check_lease_seconds
                .or(file.check_lease_seconds)
                .unwrap_or(90),
            task_lease_seconds: env
                .task_lease_seconds
                .or(file.task_lease_seconds)
                .unwrap_or(120),
            alert_utc_offset: parse_utc_offset(&offset_str)?,
            app_scheme: env
                .app_scheme
                .or(file.app_scheme)
                .unwrap_or_else(|| "https".to_string()),
            app_domain: env
                .app_domain
                .or(file.app_domain)
                .unwrap_or_else(|| "localhost".to_string()),
            mail_webhook_url: env.mail_webhook_url.or(file.mail_webhook_url),
            mail_webhook_body_template: env
                .mail_webhook_body_template
                .or(file.mail_webhook_body_template),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "WORKER_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.probe_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "PROBE_TIMEOUT_SECONDS",
                reason: "must be at least 1".to_string(),
            });
        }
        self.scan_schedule()?;
        Ok(())
    }

    pub fn scan_schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::from_str(&self.scan_schedule).map_err(|e| ConfigError::Invalid {
            field: "SCAN_SCHEDULE",
            reason: e.to_string(),
        })
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn check_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.check_lease_seconds as i64)
    }

    pub fn task_lease(&self) -> Duration {
        Duration::from_secs(self.task_lease_seconds)
    }

    pub fn logo_url(&self) -> String {
        format!("{}://{}/icon.png", self.app_scheme, self.app_domain)
    }
}

/// Parses offsets written as `+07:00`, `-03:30`, `+0700`, `Z` or `UTC`.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    trimmed
        .parse::<FixedOffset>()
        .map_err(|e| ConfigError::Invalid {
            field: "ALERT_UTC_OFFSET",
            reason: format!("{e}: {value:?}"),
        })
}
