use thiserror::Error;

/// How a failed provider call should be handled by retry loops and the
/// scheduler. Carried on the error itself so callers never need to sniff
/// message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient: retry with backoff.
    Retryable,
    /// Permanent: propagate immediately.
    NonRetryable,
    /// Rotate to the next API key, then retry.
    AuthFailure,
    /// Breaker is open: fail fast, do not touch the key rotator.
    CircuitOpen,
}

/// Errors produced by the external-provider client core.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited by provider: {message}")]
    RateLimited { message: String },

    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("circuit breaker is open, retry in {retry_in_secs}s")]
    CircuitOpen { retry_in_secs: u64 },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed provider payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("no API keys configured")]
    NoKeysAvailable,
}

impl ApiError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            ApiError::RateLimited { .. } | ApiError::Timeout { .. } => RetryClass::Retryable,
            ApiError::AuthFailed { .. } => RetryClass::AuthFailure,
            ApiError::CircuitOpen { .. } => RetryClass::CircuitOpen,
            // 5xx responses are transient from the caller's perspective.
            ApiError::Provider { status, .. } if *status >= 500 => RetryClass::Retryable,
            ApiError::Transport(e) if e.is_timeout() || e.is_connect() => RetryClass::Retryable,
            _ => RetryClass::NonRetryable,
        }
    }
}

/// Errors surfaced by the state store and its repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("unique key collision on {entity}: {key}")]
    Conflict { entity: &'static str, key: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Errors a task handler may return. The scheduler maps these onto the
/// retry policy: `Retryable` and `Timeout` count the attempt and reschedule,
/// `Fatal` marks the task failed with no further attempts.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Fatal(String),

    #[error("handler exceeded {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_) | TaskError::Timeout { .. })
    }

    /// Lift a provider error into the handler contract using its retry class.
    pub fn from_api(err: ApiError) -> Self {
        match err.retry_class() {
            RetryClass::Retryable | RetryClass::AuthFailure => {
                TaskError::Retryable(err.to_string())
            }
            // An open breaker means the provider is down for everyone;
            // retrying later is the right move.
            RetryClass::CircuitOpen => TaskError::Retryable(err.to_string()),
            RetryClass::NonRetryable => TaskError::Fatal(err.to_string()),
        }
    }
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } | StoreError::Serialization(_) => {
                TaskError::Fatal(err.to_string())
            }
            other => TaskError::Retryable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_class_mapping() {
        let e = ApiError::RateLimited {
            message: "429".into(),
        };
        assert_eq!(e.retry_class(), RetryClass::Retryable);

        let e = ApiError::AuthFailed {
            message: "invalid key".into(),
        };
        assert_eq!(e.retry_class(), RetryClass::AuthFailure);

        let e = ApiError::Provider {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(e.retry_class(), RetryClass::Retryable);

        let e = ApiError::Provider {
            status: 400,
            body: "bad request".into(),
        };
        assert_eq!(e.retry_class(), RetryClass::NonRetryable);
    }

    #[test]
    fn test_task_error_from_api() {
        let e = TaskError::from_api(ApiError::MalformedPayload {
            reason: "unexpected shape".into(),
        });
        assert!(!e.is_retryable());

        let e = TaskError::from_api(ApiError::Timeout { timeout_secs: 45 });
        assert!(e.is_retryable());
    }

    #[test]
    fn test_store_error_formatting() {
        let e = StoreError::Conflict {
            entity: "earnings_reports",
            key: "AAPL/Q3-2025".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("earnings_reports"));
        assert!(msg.contains("AAPL/Q3-2025"));
    }
}
