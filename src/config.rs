// src/config.rs

use serde::Deserialize;
use std::path::PathBuf;

use crate::api_client::{ApiConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::directory::{DEFAULT_CACHE_DIR, DEFAULT_CACHE_DURATION_SECS};
use crate::error::AppError;

pub const ENV_PREFIX: &str = "ASISTENCIA_";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Payroll API
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Output and caching
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_duration_secs")]
    pub cache_duration_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_cache_duration_secs() -> u64 {
    DEFAULT_CACHE_DURATION_SECS
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        envy::prefixed(ENV_PREFIX).from_env::<Config>()
    }

    /// API settings, required only by commands that talk to the payroll API.
    pub fn api_config(&self) -> Result<ApiConfig, AppError> {
        let base_url = self
            .api_base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AppError::MissingConfig(format!("{}API_BASE_URL", ENV_PREFIX)))?;

        Ok(ApiConfig {
            base_url,
            token: self.api_token.clone().filter(|t| !t.is_empty()),
            timeout_secs: self.request_timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn test_defaults_apply() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(config.cache_duration_secs, 86_400);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(matches!(
            config.api_config(),
            Err(AppError::MissingConfig(name)) if name == "ASISTENCIA_API_BASE_URL"
        ));
    }

    #[test]
    fn test_prefixed_values_are_read() {
        let config = from_pairs(&[
            ("ASISTENCIA_API_BASE_URL", "https://nomina.example.com/api"),
            ("ASISTENCIA_API_TOKEN", "abc123"),
            ("ASISTENCIA_OUTPUT_DIR", "/tmp/reportes"),
            ("ASISTENCIA_CACHE_DURATION_SECS", "60"),
            ("API_TOKEN", "ignored-without-prefix"),
        ])
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/reportes"));
        assert_eq!(config.cache_duration_secs, 60);

        let api = config.api_config().unwrap();
        assert_eq!(api.base_url, "https://nomina.example.com/api");
        assert_eq!(api.token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = from_pairs(&[("ASISTENCIA_REQUEST_TIMEOUT_SECS", "soon")]);
        assert!(result.is_err());
    }
}
