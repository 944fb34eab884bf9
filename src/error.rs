use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;

use crate::domain::TaskStatus;

static TRANSIENT_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)internal|server").expect("valid transient regex"));

/// Server-side failures are the only ones worth retrying.
pub fn is_transient_message(message: &str) -> bool {
    TRANSIENT_MESSAGE.is_match(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The request never produced a response (connect, timeout, TLS).
    Transport,
    /// The provider answered with a non-2xx status.
    Status(u16),
    /// The provider answered 2xx but the body could not be decoded.
    Malformed,
    /// The provider refused the request (content safety, business error code).
    Rejected,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider} request failed: {message}")]
pub struct ProviderError {
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(provider: &'static str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = match kind {
            ProviderErrorKind::Status(code) => {
                StatusCode::from_u16(code)
                    .map(|status| status.is_server_error())
                    .unwrap_or(false)
                    || is_transient_message(&message)
            }
            _ => is_transient_message(&message),
        };
        Self {
            provider,
            kind,
            message,
            retryable,
        }
    }

    pub fn status(provider: &'static str, status: StatusCode, detail: impl AsRef<str>) -> Self {
        Self::new(
            provider,
            ProviderErrorKind::Status(status.as_u16()),
            format!("status {}: {}", status, detail.as_ref()),
        )
    }

    pub fn transport(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Transport, message)
    }

    pub fn malformed(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Malformed, message)
    }

    pub fn rejected(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Rejected, message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{0} returned no text content")]
    NoContent(&'static str),

    #[error("No image data returned by {0}")]
    NoImageData(String),

    #[error("No parseable critique returned: {0}")]
    NoCritique(String),

    #[error("Task {task_id} ended with status {status}")]
    TaskFailed { task_id: String, status: TaskStatus },

    #[error("Task {task_id} did not reach a terminal state within {waited:?}")]
    TaskTimeout { task_id: String, waited: Duration },

    #[error("Artifact download failed: {0}")]
    Download(String),

    #[error("{0}")]
    InvalidState(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Provider(err) => err.retryable,
            _ => false,
        }
    }
}
