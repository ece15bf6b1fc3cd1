//! services/coach/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

const DEFAULT_GENERATION_API_BASE: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai";
const DEFAULT_VOICE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub data_dir: PathBuf,
    pub allowed_origin: String,
    /// Credential for both the generation API and the voice endpoint.
    pub api_key: Option<String>,
    pub generation_api_base: String,
    pub generation_model: String,
    pub voice_endpoint: String,
    pub voice_model: String,
    pub voice_name: String,
    pub mic_permission_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let allowed_origin = std::env::var("ALLOWED_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Credential (optional until a generation call needs it) ---
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty());

        // --- Adapter-specific Settings ---
        let generation_api_base = std::env::var("GENERATION_API_BASE")
            .unwrap_or_else(|_| DEFAULT_GENERATION_API_BASE.to_string());
        let generation_model =
            std::env::var("GENERATION_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
        let voice_endpoint = std::env::var("VOICE_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_VOICE_ENDPOINT.to_string());
        let voice_model = std::env::var("VOICE_MODEL").unwrap_or_else(|_| {
            "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string()
        });
        let voice_name = std::env::var("VOICE_NAME").unwrap_or_else(|_| "Zephyr".to_string());

        let timeout_str =
            std::env::var("MIC_PERMISSION_TIMEOUT_SECS").unwrap_or_else(|_| "30".to_string());
        let timeout_secs = timeout_str.parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue("MIC_PERMISSION_TIMEOUT_SECS".to_string(), e.to_string())
        })?;

        Ok(Self {
            bind_address,
            log_level,
            data_dir,
            allowed_origin,
            api_key,
            generation_api_base,
            generation_model,
            voice_endpoint,
            voice_model,
            voice_name,
            mic_permission_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// The credential, or an error naming the variable to set.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))
    }
}
