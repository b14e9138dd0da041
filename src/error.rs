use thiserror::Error;

/// Failure classes surfaced by the export engine and its remote collaborators.
#[derive(Debug, Error)]
pub enum FeederError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("date range of {days:.1} days exceeds the configured maximum of {max_days} days")]
    RangeTooLarge { days: f64, max_days: u64 },
    #[error("rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after_secs: Option<u64>,
    },
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("remote rejected request ({status}): {message}")]
    Remote { status: u16, message: String },
    #[error("destination does not support {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type FeederResult<T> = Result<T, FeederError>;

impl FeederError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// No conversation can make progress once credentials are rejected.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::E001Validation,
            Self::RangeTooLarge { .. } => ErrorCode::E002RangeTooLarge,
            Self::RateLimited { .. } => ErrorCode::E003RateLimited,
            Self::Auth(_) => ErrorCode::E004Auth,
            Self::Transient(_) | Self::Remote { .. } => ErrorCode::E005Remote,
            Self::Unsupported(_) => ErrorCode::E006Unsupported,
            Self::Io(_) | Self::Json(_) => ErrorCode::E007Local,
        }
    }
}

impl From<reqwest::Error> for FeederError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Self::Auth(err.to_string());
            }
            if status.is_client_error() {
                return Self::Remote {
                    status: status.as_u16(),
                    message: err.to_string(),
                };
            }
        }
        Self::Transient(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001Validation,
    E002RangeTooLarge,
    E003RateLimited,
    E004Auth,
    E005Remote,
    E006Unsupported,
    E007Local,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Validation => "E001_VALIDATION",
            Self::E002RangeTooLarge => "E002_RANGE_TOO_LARGE",
            Self::E003RateLimited => "E003_RATE_LIMITED",
            Self::E004Auth => "E004_AUTH",
            Self::E005Remote => "E005_REMOTE",
            Self::E006Unsupported => "E006_UNSUPPORTED",
            Self::E007Local => "E007_LOCAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FeederError;

    #[test]
    fn only_rate_limits_and_transient_failures_retry() {
        let limited = FeederError::RateLimited {
            endpoint: "conversations.history".to_string(),
            retry_after_secs: Some(3),
        };
        assert!(limited.is_retryable());
        assert!(FeederError::Transient("reset".into()).is_retryable());
        assert!(!FeederError::Auth("invalid_auth".into()).is_retryable());
        assert!(!FeederError::validation("bad date").is_retryable());
    }

    #[test]
    fn auth_failures_abort_the_run() {
        assert!(FeederError::Auth("token_revoked".into()).is_fatal_for_run());
        assert!(!FeederError::Transient("timeout".into()).is_fatal_for_run());
        assert_eq!(
            FeederError::Auth("x".into()).code().as_str(),
            "E004_AUTH"
        );
    }
}
