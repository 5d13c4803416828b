//! Server configuration loading from file and environment variables.

use assess_types::Question;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Who may use the service and how often.
    #[serde(default)]
    pub access: AccessConfig,

    /// Generative-AI provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Question set seeded into an empty database.
    #[serde(default)]
    pub questions: QuestionsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "assess_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Email-domain allowlist and request limits.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Email domains whose users may sign in. Empty denies everyone.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Requests per minute per client on ordinary routes.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Requests per minute per client on `/api/ai/*`.
    #[serde(default = "default_ai_rate_limit")]
    pub ai_rate_limit_per_minute: u32,
}

impl AccessConfig {
    /// Whether `domain` is on the allowlist (case-insensitive).
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        let domain = domain.trim().to_ascii_lowercase();
        !domain.is_empty()
            && self
                .allowed_domains
                .iter()
                .any(|allowed| allowed.trim().to_ascii_lowercase() == domain)
    }
}

/// Upstream generative-AI endpoint.
#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// API key sent as `x-goog-api-key`.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Sample rate of the PCM audio returned by the speech model.
    #[serde(default = "default_speech_sample_rate")]
    pub sample_rate: u32,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("text_model", &self.text_model)
            .field("transcription_model", &self.transcription_model)
            .field("speech_model", &self.speech_model)
            .field("timeout_secs", &self.timeout_secs)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// The question set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionsConfig {
    #[serde(default)]
    pub seed: Vec<Question>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "assess.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rate_limit() -> u32 {
    120
}

fn default_ai_rate_limit() -> u32 {
    30
}

fn default_provider_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_text_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_transcription_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_speech_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_speech_sample_rate() -> u32 {
    24_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            rate_limit_per_minute: default_rate_limit(),
            ai_rate_limit_per_minute: default_ai_rate_limit(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: None,
            text_model: default_text_model(),
            transcription_model: default_transcription_model(),
            speech_model: default_speech_model(),
            timeout_secs: default_provider_timeout_secs(),
            sample_rate: default_speech_sample_rate(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ASSESS_HOST` overrides `server.host`
/// - `ASSESS_PORT` overrides `server.port`
/// - `ASSESS_DB_PATH` overrides `database.path`
/// - `ASSESS_LOG_LEVEL` overrides `logging.level`
/// - `ASSESS_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `ASSESS_ALLOWED_DOMAINS` overrides `access.allowed_domains` (comma-separated)
/// - `ASSESS_PROVIDER_API_KEY` overrides `provider.api_key`
/// - `ASSESS_PROVIDER_URL` overrides `provider.base_url`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("ASSESS_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("ASSESS_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("ASSESS_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("ASSESS_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("ASSESS_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(domains) = var("ASSESS_ALLOWED_DOMAINS") {
        config.access.allowed_domains = domains
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(key) = var("ASSESS_PROVIDER_API_KEY") {
        if !key.trim().is_empty() {
            config.provider.api_key = Some(key);
        }
    }
    if let Some(url) = var("ASSESS_PROVIDER_URL") {
        config.provider.base_url = url;
    }
}
