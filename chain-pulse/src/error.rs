use thiserror::Error;

/// Errors raised while building or validating an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid capacity band: minimum {min} exceeds maximum {max}")]
    InvalidCapacityBand { min: usize, max: usize },

    #[error("failed to parse environment variable {key}={value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("threshold {name} must be finite, got {value}")]
    NonFiniteThreshold { name: &'static str, value: f64 },

    #[error("invalid snapshot url: {0}")]
    InvalidUrl(String),
}

/// Errors produced by a [`SnapshotSource`](crate::feed::SnapshotSource).
///
/// None of these ever mutate engine state: the scheduler logs them and polls again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("unauthorized: server responded with status {0}")]
    Unauthorized(u16),

    #[error("failed to decode snapshot: {0}")]
    Decode(String),
}

impl FetchError {
    /// Determine if the error must be surfaced to the session/login flow.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }

    /// Determine if polling again may succeed without outside intervention.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout(_) => true,
            FetchError::Status(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else if let Some(status) = value.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(value.to_string())
        }
    }
}
