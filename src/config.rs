use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TRANSLATION_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
pub const DEFAULT_TRANSLATION_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_SETTINGS_PATH: &str = "data/settings.json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_api_url: String,
    pub telegram_webhook_secret: Option<String>,

    // Translation backend (OpenAI-compatible chat completions)
    pub translation_api_key: String,
    pub translation_api_url: String,
    pub translation_model: String,
    pub translation_timeout: Duration,

    // Settings store
    pub redis_url: Option<String>,
    pub redis_tls: bool,
    pub settings_path: String,
    pub store_timeout: Duration,

    // Server
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?,
            telegram_api_url: optional("TELEGRAM_API_URL")
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            telegram_webhook_secret: optional("TELEGRAM_WEBHOOK_SECRET"),

            // GOOGLE_API_KEY is what older deployments were configured with
            translation_api_key: match optional("TRANSLATION_API_KEY") {
                Some(key) => key,
                None => optional("GOOGLE_API_KEY").ok_or(ConfigError::Missing("TRANSLATION_API_KEY"))?,
            },
            translation_api_url: optional("TRANSLATION_API_URL")
                .unwrap_or_else(|| DEFAULT_TRANSLATION_API_URL.to_string()),
            translation_model: optional("TRANSLATION_MODEL")
                .unwrap_or_else(|| DEFAULT_TRANSLATION_MODEL.to_string()),
            translation_timeout: Duration::from_secs(parsed("TRANSLATION_TIMEOUT_SECS", 20)?),

            redis_url: optional("REDIS_URL"),
            redis_tls: env_flag("REDIS_TLS", false)?,
            settings_path: settings_path_from_env(),
            store_timeout: Duration::from_secs(parsed("STORE_TIMEOUT_SECS", 5)?),

            port: parsed("PORT", 10000)?,
        })
    }
}

/// `true`/`false`, `1`/`0`, `yes`/`no` or `on`/`off`, case-insensitive.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Boolean environment variable; unset or empty gives `default`.
pub fn env_flag(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(var) {
        Some(value) => parse_flag(&value).ok_or(ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

pub fn settings_path_from_env() -> String {
    optional("SETTINGS_PATH").unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string())
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    optional(var).ok_or(ConfigError::Missing(var))
}

/// Empty values count as unset.
fn optional(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(var) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
