use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_CRM_URL: &str = "http://localhost:8080/api/v1";
const DEFAULT_CRM_TIMEOUT_SECS: u64 = 10;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub crm_url: String,
    pub crm_api_key: String,
    /// Upper bound for every CRM request. A request past this fails as a timeout.
    pub crm_timeout: Duration,
    /// CRM is configured for international numbering, so `+1XXXXXXXXXX` is tried first.
    pub international_phones: bool,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let crm_timeout_secs = match std::env::var("CRM_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .context("CRM_TIMEOUT_SECS must be a whole number of seconds")?,
            Err(_) => DEFAULT_CRM_TIMEOUT_SECS,
        };

        Ok(Config {
            crm_url: std::env::var("ESPOCRM_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_CRM_URL.to_string()),
            crm_api_key: require_env("ESPO_API_KEY")?,
            crm_timeout: Duration::from_secs(crm_timeout_secs),
            international_phones: std::env::var("CRM_INTERNATIONAL_PHONES")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
