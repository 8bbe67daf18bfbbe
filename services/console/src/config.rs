use heychess_core::{
    SessionBudgets,
    engine::{DEFAULT_ENGINE_PATH, DEFAULT_SEARCH_DEPTH},
    log::DEFAULT_HISTORY_LIMIT,
    wake::DEFAULT_WAKE_PHRASE,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub wake_phrase: String,
    pub active_timeout: Duration,
    pub sandbox_timeout: Duration,
    pub tick_interval: Duration,
    pub poll_interval: Duration,
    pub log_history_limit: usize,
    pub log_level: Level,
    /// Path to a UCI engine binary. A missing binary falls back to random moves.
    pub engine_path: PathBuf,
    pub engine_depth: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let wake_phrase = match std::env::var("WAKE_PHRASE") {
            Ok(phrase) => non_blank("WAKE_PHRASE", phrase)?,
            Err(_) => DEFAULT_WAKE_PHRASE.to_string(),
        };

        let active_timeout = seconds_var("ACTIVE_TIMEOUT_SECS", 10.0)?;
        let sandbox_timeout = seconds_var("SANDBOX_TIMEOUT_SECS", 30.0)?;
        let tick_interval = millis_var("TICK_INTERVAL_MS", 100)?;
        let poll_interval = millis_var("POLL_INTERVAL_MS", 100)?;

        let log_history_limit = match std::env::var("LOG_HISTORY_LIMIT") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|e| {
                ConfigError::InvalidValue("LOG_HISTORY_LIMIT".to_string(), e.to_string())
            })?,
            Err(_) => DEFAULT_HISTORY_LIMIT,
        };

        let engine_path = match std::env::var("ENGINE_PATH") {
            Ok(path) => PathBuf::from(non_blank("ENGINE_PATH", path)?),
            Err(_) => PathBuf::from(DEFAULT_ENGINE_PATH),
        };

        let engine_depth = match std::env::var("ENGINE_DEPTH") {
            Ok(raw) => match raw.trim().parse::<u32>() {
                Ok(depth) if depth > 0 => depth,
                Ok(_) => {
                    return Err(ConfigError::InvalidValue(
                        "ENGINE_DEPTH".to_string(),
                        "depth must be at least 1".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(ConfigError::InvalidValue(
                        "ENGINE_DEPTH".to_string(),
                        e.to_string(),
                    ));
                }
            },
            Err(_) => DEFAULT_SEARCH_DEPTH,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            wake_phrase,
            active_timeout,
            sandbox_timeout,
            tick_interval,
            poll_interval,
            log_history_limit,
            log_level,
            engine_path,
            engine_depth,
        })
    }

    /// Applies command-line overrides, validated like their variables.
    pub fn with_overrides(
        mut self,
        wake_phrase: Option<String>,
        active_timeout: Option<f64>,
        sandbox_timeout: Option<f64>,
    ) -> Result<Self, ConfigError> {
        if let Some(phrase) = wake_phrase {
            self.wake_phrase = non_blank("--wake-phrase", phrase)?;
        }
        if let Some(secs) = active_timeout {
            self.active_timeout = seconds("--active-timeout", secs)?;
        }
        if let Some(secs) = sandbox_timeout {
            self.sandbox_timeout = seconds("--sandbox-timeout", secs)?;
        }
        Ok(self)
    }

    pub fn budgets(&self) -> SessionBudgets {
        SessionBudgets {
            active: self.active_timeout,
            sandbox: self.sandbox_timeout,
        }
    }
}

fn non_blank(name: &str, value: String) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingVar(format!("{name} must not be blank")));
    }
    Ok(value.to_string())
}

fn seconds(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{secs}' is not a positive number of seconds"),
        ));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn seconds_var(name: &str, default: f64) -> Result<Duration, ConfigError> {
    let secs = match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))?,
        Err(_) => default,
    };
    seconds(name, secs)
}

fn millis_var(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let millis = match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))?,
        Err(_) => default,
    };
    if millis == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "interval must be at least 1 ms".to_string(),
        ));
    }
    Ok(Duration::from_millis(millis))
}
