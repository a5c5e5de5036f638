use crate::auth::{CredentialSupplier, NoCredentials, StaticToken, TokenFile};
use crate::error::LiveError;
use dotenvy::dotenv;
use resilience::ReconnectPolicy;
use std::env;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/api/ws/websocket";
pub const DEFAULT_FEED_CAPACITY: NonZeroUsize = match NonZeroUsize::new(50) {
    Some(n) => n,
    None => panic!("feed capacity must be non-zero"),
};

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
    pub handshake_timeout: Duration,
    pub feed_capacity: NonZeroUsize,
    pub auth_token: Option<String>,
    pub auth_token_file: Option<PathBuf>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            feed_capacity: DEFAULT_FEED_CAPACITY,
            auth_token: None,
            auth_token_file: None,
        }
    }
}

impl LiveConfig {
    pub fn from_env() -> Result<Self, LiveError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LiveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let ws_url = get("LIVE_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(LiveError::Config(format!(
                "LIVE_WS_URL must be a ws:// or wss:// url, got {ws_url}"
            )));
        }

        let base_delay_ms: u64 = parse_or(get("LIVE_RECONNECT_BASE_DELAY_MS"), 2000, "LIVE_RECONNECT_BASE_DELAY_MS")?;
        let max_attempts: u32 = parse_or(get("LIVE_RECONNECT_MAX_ATTEMPTS"), 5, "LIVE_RECONNECT_MAX_ATTEMPTS")?;
        let max_delay_ms: u64 = parse_or(get("LIVE_BACKOFF_MAX_DELAY_MS"), 30_000, "LIVE_BACKOFF_MAX_DELAY_MS")?;
        let jitter: bool = parse_or(get("LIVE_BACKOFF_JITTER"), true, "LIVE_BACKOFF_JITTER")?;

        let strategy = get("LIVE_BACKOFF_STRATEGY").unwrap_or_else(|| "linear".to_string());
        let reconnect = match strategy.to_ascii_lowercase().as_str() {
            "linear" => ReconnectPolicy::linear(Duration::from_millis(base_delay_ms), max_attempts),
            "exponential" => ReconnectPolicy::exponential(
                Duration::from_millis(base_delay_ms),
                Duration::from_millis(max_delay_ms),
                max_attempts,
                jitter,
            ),
            other => {
                return Err(LiveError::Config(format!(
                    "LIVE_BACKOFF_STRATEGY must be linear or exponential, got {other}"
                )))
            }
        };

        let handshake_timeout_ms: u64 = parse_or(get("LIVE_HANDSHAKE_TIMEOUT_MS"), 10_000, "LIVE_HANDSHAKE_TIMEOUT_MS")?;
        let feed_capacity: NonZeroUsize =
            parse_or(get("LIVE_FEED_CAPACITY"), DEFAULT_FEED_CAPACITY, "LIVE_FEED_CAPACITY")?;

        Ok(Self {
            ws_url,
            reconnect,
            handshake_timeout: Duration::from_millis(handshake_timeout_ms),
            feed_capacity,
            auth_token: get("LIVE_AUTH_TOKEN"),
            auth_token_file: get("LIVE_AUTH_TOKEN_FILE").map(PathBuf::from),
        })
    }

    /// Credential supplier implied by the config; a token file beats a literal token
    pub fn credentials(&self) -> Arc<dyn CredentialSupplier> {
        match (&self.auth_token_file, &self.auth_token) {
            (Some(path), _) => Arc::new(TokenFile::new(path.clone())),
            (None, Some(token)) => Arc::new(StaticToken::new(token.clone())),
            (None, None) => Arc::new(NoCredentials),
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T, key: &str) -> Result<T, LiveError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| LiveError::Config(format!("{key} has invalid value {raw:?}"))),
    }
}
