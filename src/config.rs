use std::{path::PathBuf, time::Duration};

use crate::errors::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_SESSION_PATH: &str = ".explorer-session.json";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// root of the backend, without the `/api` prefix
    pub api_url: String,
    pub session_path: PathBuf,
    pub request_timeout: Duration,
    /// daily rolling log files go here when set
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            session_path: DEFAULT_SESSION_PATH.into(),
            request_timeout: REQUEST_TIMEOUT,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Default::default()
        }
    }

    /// reads `EXPLORER_API_URL`, `EXPLORER_SESSION_PATH`, `EXPLORER_TIMEOUT_SECS` and `LOG_PATH`,
    /// falling back to the defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = var("EXPLORER_API_URL") {
            config.api_url = url;
        }
        if let Some(path) = var("EXPLORER_SESSION_PATH") {
            config.session_path = path.into();
        }
        if let Some(secs) = var("EXPLORER_TIMEOUT_SECS") {
            config.request_timeout = parse_timeout(&secs)?;
        }
        config.log_dir = var("LOG_PATH").map(PathBuf::from);

        Ok(config)
    }
}

fn parse_timeout(secs: &str) -> Result<Duration, ConfigError> {
    match secs.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name: "EXPLORER_TIMEOUT_SECS",
            message: "must be at least one second".to_string(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::Invalid {
            name: "EXPLORER_TIMEOUT_SECS",
            message: e.to_string(),
        }),
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
