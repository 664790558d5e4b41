//! Error types for remote model invocations.
//!
//! A [`ProviderError`] describes one failed call against one model. The
//! fallback invoker classifies it as retriable or fatal and folds the outcome
//! of a whole invocation into a single [`InvokeError`] for the caller.

use std::fmt;
use thiserror::Error;

/// Status text the Gemini API attaches to quota rejections.
const QUOTA_STATUS: &str = "RESOURCE_EXHAUSTED";
const UNAVAILABLE_STATUS: &str = "UNAVAILABLE";
/// Status text used for per-attempt timeouts, both remote and local.
pub const DEADLINE_STATUS: &str = "DEADLINE_EXCEEDED";

/// A single failed call against one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// HTTP status, when the failure came back as a response.
    pub status: Option<u16>,
    /// Machine-readable status text from the error body (e.g. `RESOURCE_EXHAUSTED`).
    pub code: Option<String>,
    pub message: String,
    /// True when the request never produced a response (connect/reset).
    pub transport: bool,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            transport: false,
        }
    }

    pub fn http(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: message.into(),
            transport: false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            transport: true,
            ..Self::new(message)
        }
    }

    pub fn timed_out(after: std::time::Duration) -> Self {
        Self {
            code: Some(DEADLINE_STATUS.to_string()),
            ..Self::new(format!("attempt timed out after {}s", after.as_secs_f32()))
        }
    }

    /// Decides whether trying the next model could help.
    ///
    /// Structured fields win; message substrings are only consulted when the
    /// status and code say nothing.
    pub fn classify(&self) -> FailureClass {
        if let Some(status) = self.status {
            match status {
                429 => return FailureClass::Retriable(RetryReason::RateLimited),
                503 => return FailureClass::Retriable(RetryReason::Unavailable),
                500..=599 => return FailureClass::Retriable(RetryReason::ServerFault),
                _ => {}
            }
        }
        match self.code.as_deref() {
            Some(QUOTA_STATUS) => return FailureClass::Retriable(RetryReason::QuotaExhausted),
            Some(UNAVAILABLE_STATUS) => return FailureClass::Retriable(RetryReason::Unavailable),
            Some(DEADLINE_STATUS) => return FailureClass::Retriable(RetryReason::Timeout),
            _ => {}
        }
        if self.transport {
            return FailureClass::Retriable(RetryReason::Unavailable);
        }
        if self.status.is_some() {
            return FailureClass::Fatal;
        }

        let message = self.message.to_lowercase();
        if message.contains("429") {
            FailureClass::Retriable(RetryReason::RateLimited)
        } else if message.contains("503") {
            FailureClass::Retriable(RetryReason::Unavailable)
        } else if message.contains("500") {
            FailureClass::Retriable(RetryReason::ServerFault)
        } else if message.contains("quota") {
            FailureClass::Retriable(RetryReason::QuotaExhausted)
        } else if message.contains("overloaded") || message.contains("capacity") {
            FailureClass::Retriable(RetryReason::Overloaded)
        } else {
            FailureClass::Fatal
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self.classify(), FailureClass::Retriable(_))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.code.as_deref()) {
            (Some(status), Some(code)) => write!(f, "{} {}: {}", status, code, self.message),
            (Some(status), None) => write!(f, "{}: {}", status, self.message),
            (None, Some(code)) => write!(f, "{}: {}", code, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self {
                code: Some(DEADLINE_STATUS.to_string()),
                ..Self::new(err.to_string())
            };
        }
        if err.is_connect() || err.is_request() {
            return Self::transport(err.to_string());
        }
        match err.status() {
            Some(status) => Self::http(status.as_u16(), None, err.to_string()),
            None => Self::new(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retriable(RetryReason),
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    Unavailable,
    ServerFault,
    QuotaExhausted,
    Overloaded,
    Timeout,
}

/// Coarse classification of an [`InvokeError`], used by callers to pick a
/// user-facing message or status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ServiceUnavailable,
    Request,
    MalformedResponse,
    Cancelled,
}

/// Terminal outcome of a failed invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("API key is missing. Please enter your Gemini API key in Settings.")]
    MissingCredential,

    #[error("model '{model}' rejected the request: {source}")]
    Rejected {
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("model '{model}' returned a malformed response: {reason}")]
    MalformedResponse { model: String, reason: String },

    #[error("service unavailable: all {attempts} models failed, last error from '{model}': {source}")]
    Exhausted {
        attempts: usize,
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("request was cancelled")]
    Cancelled,
}

impl InvokeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvokeError::MissingCredential => ErrorKind::Configuration,
            InvokeError::Rejected { .. } => ErrorKind::Request,
            InvokeError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            InvokeError::Exhausted { .. } => ErrorKind::ServiceUnavailable,
            InvokeError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// A short message suitable for the exercise screen.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Configuration => self.to_string(),
            ErrorKind::ServiceUnavailable => {
                "The AI service is busy right now. Please try again in a moment.".to_string()
            }
            ErrorKind::Cancelled => "The request was cancelled.".to_string(),
            ErrorKind::Request | ErrorKind::MalformedResponse => {
                "Something went wrong while grading. Please try again.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_structured_status_classification() {
        assert_eq!(
            ProviderError::http(429, None, "slow down").classify(),
            FailureClass::Retriable(RetryReason::RateLimited)
        );
        assert_eq!(
            ProviderError::http(503, None, "try later").classify(),
            FailureClass::Retriable(RetryReason::Unavailable)
        );
        assert_eq!(
            ProviderError::http(502, None, "bad gateway").classify(),
            FailureClass::Retriable(RetryReason::ServerFault)
        );
        assert_eq!(
            ProviderError::http(400, Some("INVALID_ARGUMENT".into()), "bad request").classify(),
            FailureClass::Fatal
        );
        assert_eq!(
            ProviderError::http(403, None, "API key not valid").classify(),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_status_code_text_wins_over_client_error_status() {
        let quota = ProviderError::http(400, Some(QUOTA_STATUS.into()), "limit");
        assert_eq!(
            quota.classify(),
            FailureClass::Retriable(RetryReason::QuotaExhausted)
        );
    }

    #[test]
    fn test_client_error_status_ignores_message_substrings() {
        let err = ProviderError::http(400, None, "field 'max_tokens' must be below 500");
        assert_eq!(err.classify(), FailureClass::Fatal);
    }

    #[test]
    fn test_substring_fallback_without_structure() {
        for (message, reason) in [
            ("got status 429 from upstream", RetryReason::RateLimited),
            ("HTTP 503", RetryReason::Unavailable),
            ("internal 500", RetryReason::ServerFault),
            ("You exceeded your current Quota", RetryReason::QuotaExhausted),
            ("The model is overloaded", RetryReason::Overloaded),
            ("no capacity left", RetryReason::Overloaded),
        ] {
            assert_eq!(
                ProviderError::new(message).classify(),
                FailureClass::Retriable(reason),
                "{message}"
            );
        }
        assert_eq!(
            ProviderError::new("unexpected token in JSON").classify(),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_transport_and_timeout_are_retriable() {
        assert!(ProviderError::transport("connection reset").is_retriable());
        assert_eq!(
            ProviderError::timed_out(Duration::from_secs(5)).classify(),
            FailureClass::Retriable(RetryReason::Timeout)
        );
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::http(429, Some(QUOTA_STATUS.into()), "quota hit");
        assert_eq!(err.to_string(), "429 RESOURCE_EXHAUSTED: quota hit");
        assert_eq!(ProviderError::new("plain").to_string(), "plain");
    }

    #[test]
    fn test_invoke_error_kinds() {
        assert_eq!(InvokeError::MissingCredential.kind(), ErrorKind::Configuration);
        assert_eq!(InvokeError::Cancelled.kind(), ErrorKind::Cancelled);
        let exhausted = InvokeError::Exhausted {
            attempts: 3,
            model: "m3".into(),
            source: ProviderError::http(503, None, "down"),
        };
        assert_eq!(exhausted.kind(), ErrorKind::ServiceUnavailable);
        assert!(exhausted.to_string().contains("service unavailable"));
        assert!(exhausted.user_message().contains("try again"));
    }
}
