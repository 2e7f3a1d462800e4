//! Bedrock layer errors and AWS SDK error classification.

use aws_sdk_bedrockruntime::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

use crate::config::DEFAULT_RETRYABLE_CODES;

#[derive(Debug, Clone, Error)]
pub enum BedrockError {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("authentication: {0}")]
    Authentication(String),

    #[error("model: {message}")]
    Model { message: String, code: Option<String> },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("service: {message}")]
    Service { message: String, code: Option<String> },

    #[error("embedding: {0}")]
    Embedding(String),

    #[error("transport: {0}")]
    Transport(String),
}

impl BedrockError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model { message: msg.into(), code: None }
    }

    pub fn service(msg: impl Into<String>, code: Option<String>) -> Self {
        Self::Service { message: msg.into(), code }
    }

    /// AWS service error code, when the error came back from an AWS API.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Model { code, .. } | Self::Service { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Short type label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::Model { .. } => "model",
            Self::Timeout(_) => "timeout",
            Self::RateLimit(_) => "rate_limit",
            Self::Service { .. } => "service",
            Self::Embedding(_) => "embedding",
            Self::Transport(_) => "transport",
        }
    }

    /// Retry decision against the built-in code list.
    pub fn is_retryable(&self) -> bool {
        self.is_retryable_with(&[])
    }

    /// Retry decision: rate limit, service, timeout and transport errors are
    /// always retried; anything carrying an AWS code is retried only when the
    /// code is in the built-in list or in `extra_codes`.
    pub fn is_retryable_with(&self, extra_codes: &[String]) -> bool {
        if let Some(code) = self.code() {
            if DEFAULT_RETRYABLE_CODES.contains(&code) || extra_codes.iter().any(|c| c == code) {
                return true;
            }
        }
        matches!(
            self,
            Self::RateLimit(_) | Self::Service { .. } | Self::Timeout(_) | Self::Transport(_)
        )
    }
}

// ── AWS SDK classification ──────────────────────────────────────────────────

/// Code / message pair pulled out of an SDK error.
#[derive(Debug, Clone)]
pub(crate) struct AwsFailure {
    pub code: Option<String>,
    pub message: String,
    /// Connection / dispatch / timeout failure before a service response.
    pub transport: bool,
}

impl AwsFailure {
    pub fn from_sdk<E, R>(err: &SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let transport = matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_));
        let code = err.code().map(str::to_string);
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| aws_sdk_bedrockruntime::error::DisplayErrorContext(err).to_string());
        Self { code, message, transport }
    }

    pub fn code_or_unknown(&self) -> &str {
        self.code.as_deref().unwrap_or("Unknown")
    }
}

/// Map a failed `invoke_model` call for `model_id` to a typed error.
pub(crate) fn map_invoke_failure(model_id: &str, f: AwsFailure) -> BedrockError {
    if f.transport {
        return BedrockError::Transport(format!("model {model_id}: {}", f.message));
    }
    match f.code.as_deref() {
        Some("ThrottlingException") => {
            BedrockError::RateLimit(format!("Rate limit exceeded for model {model_id}: {}", f.message))
        }
        Some("ValidationException") => BedrockError::Model {
            message: format!("Invalid request for model {model_id}: {}", f.message),
            code: f.code,
        },
        Some("AccessDeniedException") => BedrockError::Model {
            message: format!("Access denied to model {model_id}: {}", f.message),
            code: f.code,
        },
        Some("ModelTimeoutException") => {
            BedrockError::Timeout(format!("Model {model_id} timed out: {}", f.message))
        }
        _ => BedrockError::Model {
            message: format!("Model {model_id} error {}: {}", f.code_or_unknown(), f.message),
            code: f.code,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: Option<&str>) -> AwsFailure {
        AwsFailure {
            code: code.map(str::to_string),
            message: "boom".into(),
            transport: false,
        }
    }

    #[test]
    fn throttling_maps_to_rate_limit() {
        let e = map_invoke_failure("m", failure(Some("ThrottlingException")));
        assert!(matches!(e, BedrockError::RateLimit(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn validation_is_model_and_not_retried() {
        let e = map_invoke_failure("m", failure(Some("ValidationException")));
        assert!(matches!(e, BedrockError::Model { .. }));
        assert_eq!(e.code(), Some("ValidationException"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn access_denied_not_retried() {
        let e = map_invoke_failure("m", failure(Some("AccessDeniedException")));
        assert!(e.to_string().contains("Access denied to model m"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn model_timeout_maps_to_timeout() {
        let e = map_invoke_failure("m", failure(Some("ModelTimeoutException")));
        assert!(matches!(e, BedrockError::Timeout(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn unavailable_code_retried_through_code_list() {
        let e = map_invoke_failure("m", failure(Some("ServiceUnavailableException")));
        assert!(matches!(e, BedrockError::Model { .. }));
        assert!(e.is_retryable());
    }

    #[test]
    fn extra_codes_extend_list() {
        let e = map_invoke_failure("m", failure(Some("CustomBusyException")));
        assert!(!e.is_retryable());
        assert!(e.is_retryable_with(&["CustomBusyException".to_string()]));
    }

    #[test]
    fn transport_failure_retried() {
        let f = AwsFailure { transport: true, ..failure(None) };
        let e = map_invoke_failure("m", f);
        assert!(matches!(e, BedrockError::Transport(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn configuration_never_retried() {
        assert!(!BedrockError::configuration("x").is_retryable());
        assert!(!BedrockError::authentication("x").is_retryable());
    }
}
