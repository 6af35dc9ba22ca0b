use thiserror::Error;

/// Why a dispatch produced no images.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Rejected before any network traffic; stats are untouched.
    #[error("{0}")]
    Validation(String),
    /// Another dispatch is still in flight on this dispatcher.
    #[error("a generation is already in progress")]
    Busy,
    #[error("{message}")]
    Transport { status: Option<u16>, message: String },
    #[error("{0}")]
    EmptyResult(String),
}

impl DispatchError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        DispatchError::Transport {
            status,
            message: message.into(),
        }
    }

    /// Only errors raised after a request was attempted count as failures.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            DispatchError::Transport { .. } | DispatchError::EmptyResult(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

/// A single malformed `data:` frame. Logged and skipped, never fatal.
#[derive(Debug, Error)]
#[error("malformed stream frame: {source}")]
pub struct DecodeError {
    pub frame: String,
    #[source]
    pub source: serde_json::Error,
}

/// Human hint for common upstream status codes.
pub fn status_hint(status: u16) -> Option<&'static str> {
    match status {
        401 => Some("authentication failed, check the API key"),
        403 => Some("access denied"),
        404 => Some("resource not found"),
        429 => Some("too many requests, try again later"),
        500 => Some("server error"),
        502 => Some("bad gateway"),
        503 => Some("service temporarily unavailable"),
        504 => Some("upstream timed out"),
        _ => None,
    }
}
