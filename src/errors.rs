use std::error::Error as _;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("{detail}")]
    Http { status: u16, detail: String },
    #[error("{detail}")]
    Unauthorized { detail: String },
    #[error("could not parse response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("session storage: {0}")]
    Session(#[from] SessionError),
}

impl ApiError {
    /// cancellation is not a failure and never reaches visible state
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ApiError::Timeout;
        }

        // keep the chained causes, reqwest's own message hides dns/tls/socket failures
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            let cause = cause.to_string();
            if !cause.is_empty() && !message.contains(&cause) {
                message.push_str(": ");
                message.push_str(&cause);
            }
            source = source.and_then(|s| s.source());
        }

        ApiError::Network(message)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("stored session is not valid json")]
    Json(#[from] serde_json::Error),
    #[error("session lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} is not valid: {message}")]
    Invalid { name: &'static str, message: String },
    #[error("could not build http client")]
    Client(#[from] reqwest::Error),
}
