use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::uploader::upload_queue::{
    QueueConfig, DEFAULT_CONCURRENCY, DEFAULT_DEDUPE_WINDOW, DEFAULT_ENDPOINT, DEFAULT_FIELD_NAME,
};
use crate::uploader::RetryPolicy;

const APP_DIR_NAME: &str = "image-upload-queue";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub endpoint: String,
    pub field_name: String,
    pub concurrency: usize,
    pub dedupe_window_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            base_url: Some("http://localhost:5000".to_string()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            dedupe_window_ms: DEFAULT_DEDUPE_WINDOW.as_millis() as u64,
            max_retries: retry.max_retries,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_jitter_ms: retry.max_jitter.as_millis() as u64,
            request_timeout_secs: 120,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.concurrency,
            dedupe_window: Duration::from_millis(self.dedupe_window_ms),
            endpoint: self.endpoint.clone(),
            field_name: self.field_name.clone(),
            retry: self.retry_policy(),
        }
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

/// Load the config at `config_path`, writing defaults if it does not exist.
/// A file that exists but does not parse is an error, never replaced.
pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str)?;

        validate_config(&config)?;

        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config_to(config_path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup of existing config
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if let Some(base_url) = &config.base_url {
        if reqwest::Url::parse(base_url).is_err() {
            return Err(AppError::validation("base_url", "Must be an absolute URL"));
        }
    }

    crate::security::InputValidator::validate_endpoint(&config.endpoint)
        .map_err(|_| AppError::validation("endpoint", "Must be an absolute URL or start with '/'"))?;

    crate::security::InputValidator::validate_field_name(&config.field_name)
        .map_err(|_| AppError::validation("field_name", "Must be a valid form field name"))?;

    if config.concurrency == 0 || config.concurrency > 16 {
        return Err(AppError::validation("concurrency", "Must be between 1 and 16"));
    }

    if config.dedupe_window_ms > 60_000 {
        return Err(AppError::validation("dedupe_window_ms", "Must be 60000ms or less"));
    }

    if config.max_retries > 10 {
        return Err(AppError::validation("max_retries", "Must be 10 or fewer"));
    }

    if config.base_delay_ms == 0 {
        return Err(AppError::validation("base_delay_ms", "Must be greater than 0"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.dedupe_window_ms, 1500);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c: &mut Config| c.concurrency = 0),
            Box::new(|c: &mut Config| c.concurrency = 17),
            Box::new(|c: &mut Config| c.max_retries = 11),
            Box::new(|c: &mut Config| c.base_delay_ms = 0),
            Box::new(|c: &mut Config| c.dedupe_window_ms = 120_000),
            Box::new(|c: &mut Config| c.request_timeout_secs = 0),
            Box::new(|c: &mut Config| c.log_level = "loud".to_string()),
            Box::new(|c: &mut Config| c.endpoint = "upload".to_string()),
            Box::new(|c: &mut Config| c.field_name = String::new()),
            Box::new(|c: &mut Config| c.base_url = Some("localhost".to_string())),
        ];

        for mutate in cases {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(validate_config(&config).is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_queue_config_conversion() {
        let config = Config {
            concurrency: 3,
            dedupe_window_ms: 2000,
            base_delay_ms: 100,
            max_jitter_ms: 0,
            ..Config::default()
        };

        let queue_config = config.queue_config();
        assert_eq!(queue_config.concurrency, 3);
        assert_eq!(queue_config.dedupe_window, Duration::from_secs(2));
        assert_eq!(queue_config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(queue_config.retry.max_jitter, Duration::ZERO);
        assert_eq!(queue_config.endpoint, "/api/upload/image");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_then_load_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        save_config_to(&path, &Config::default()).unwrap();

        let custom = Config {
            concurrency: 4,
            log_level: "debug".to_string(),
            ..Config::default()
        };
        save_config_to(&path, &custom).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), custom);
        assert!(path.with_extension("json.bak").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "concurrency": 2 }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.field_name, "image");
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "base_url": "https://uploads.example.com", "#).unwrap();

        let result = load_config_from(&path);
        assert!(matches!(result, Err(AppError::Json(_))));

        // The broken file is left for the user to fix
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("uploads.example.com"));
    }

    #[test]
    fn test_log_level_filter() {
        let config = Config {
            log_level: "debug".to_string(),
            ..Config::default()
        };
        assert_eq!(config.log_level_filter(), log::LevelFilter::Debug);
    }
}
