use crate::stomp::StompError;
use crate::transport::TransportError;
use thiserror::Error;

pub type LiveResult<T> = Result<T, LiveError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LiveError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("reconnect attempts exhausted after {attempts} tries, refresh required")]
    ReconnectExhausted { attempts: u32 },

    #[error("connection torn down by disconnect")]
    Disconnected,

    #[error("live-update driver is not running")]
    DriverStopped,

    #[error("encode error: {0}")]
    Encode(String),
}

impl From<TransportError> for LiveError {
    fn from(e: TransportError) -> Self {
        LiveError::Transport(e.to_string())
    }
}

impl From<StompError> for LiveError {
    fn from(e: StompError) -> Self {
        LiveError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::Encode(e.to_string())
    }
}

impl LiveError {
    /// Whether the reconnect policy will keep trying on its own
    ///
    /// `ReconnectExhausted` is terminal until `retry()` is called explicitly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LiveError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transport_errors_are_retryable() {
        let err: LiveError = TransportError::Timeout(Duration::from_secs(10)).into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_exhaustion_is_not_retryable() {
        let err = LiveError::ReconnectExhausted { attempts: 5 };
        assert!(!err.is_retryable());
        assert!(!LiveError::Disconnected.is_retryable());
        assert!(!LiveError::Config("LIVE_WS_URL".into()).is_retryable());
    }
}
