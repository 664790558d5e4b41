use lingua_core::{
    client::DEFAULT_GEMINI_BASE_URL, models::ModelCatalog, session::DEFAULT_TURN_BUDGET,
};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Initial API key. Can be replaced at runtime through `PUT /settings`.
    pub gemini_api_key: Option<SecretString>,
    pub gemini_base_url: String,
    pub selected_model: String,
    pub attempt_timeout: Duration,
    pub turn_budget: usize,
    pub profile_dir: PathBuf,
    /// Directory of prompt overrides; built-in prompts are used when unset.
    pub prompts_path: Option<PathBuf>,
    /// Curriculum JSON file; the built-in tables are used when unset.
    pub curriculum_path: Option<PathBuf>,
    pub log_level: Level,
}

fn parse_positive<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a positive integer", raw),
            )),
        },
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        let gemini_base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string());

        let catalog = ModelCatalog::default();
        let selected_model = std::env::var("SELECTED_MODEL")
            .unwrap_or_else(|_| catalog.default_model().id.clone());
        if !catalog.contains(&selected_model) {
            return Err(ConfigError::InvalidValue(
                "SELECTED_MODEL".to_string(),
                format!("'{}' is not a known model", selected_model),
            ));
        }

        let attempt_timeout = Duration::from_secs(parse_positive("ATTEMPT_TIMEOUT_SECS", 60u64)?);
        let turn_budget = parse_positive("TURN_BUDGET", DEFAULT_TURN_BUDGET)?;

        let profile_dir = std::env::var("PROFILE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/profiles"));
        let prompts_path = std::env::var("PROMPTS_PATH").ok().map(PathBuf::from);
        let curriculum_path = std::env::var("CURRICULUM_PATH").ok().map(PathBuf::from);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            gemini_base_url,
            selected_model,
            attempt_timeout,
            turn_budget,
            profile_dir,
            prompts_path,
            curriculum_path,
            log_level,
        })
    }
}
