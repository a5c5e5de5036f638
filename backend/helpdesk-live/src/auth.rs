//! Bearer credential suppliers for the connection handshake.
//!
//! The connection driver asks its supplier for a token at every connect
//! attempt, so a token refreshed mid-session is picked up by the next
//! reconnect without rebuilding the session.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

/// Synchronous accessor for the current bearer credential
pub trait CredentialSupplier: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

impl<F> CredentialSupplier for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// Anonymous connections
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialSupplier for NoCredentials {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialSupplier for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Token kept in a file that another process rewrites on refresh
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSupplier for TokenFile {
    fn bearer_token(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "token file unreadable");
                None
            }
        }
    }
}

/// In-process token slot, updated by whoever owns the login flow
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

impl CredentialSupplier for SharedToken {
    fn bearer_token(&self) -> Option<String> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_token_reflects_refresh() {
        let token = SharedToken::new();
        assert_eq!(token.bearer_token(), None);

        token.set("first");
        assert_eq!(token.bearer_token().as_deref(), Some("first"));

        token.set("second");
        assert_eq!(token.bearer_token().as_deref(), Some("second"));

        token.clear();
        assert_eq!(token.bearer_token(), None);
    }

    #[test]
    fn test_token_file_is_reread() {
        let path = std::env::temp_dir().join(format!("helpdesk-live-token-{}", uuid::Uuid::new_v4()));
        let supplier = TokenFile::new(&path);
        assert_eq!(supplier.bearer_token(), None);

        std::fs::write(&path, "abc\n").unwrap();
        assert_eq!(supplier.bearer_token().as_deref(), Some("abc"));

        std::fs::write(&path, "   ").unwrap();
        assert_eq!(supplier.bearer_token(), None);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_closure_supplier() {
        let supplier = || Some("from-closure".to_string());
        assert_eq!(supplier.bearer_token().as_deref(), Some("from-closure"));
        assert_eq!(NoCredentials.bearer_token(), None);
        assert_eq!(StaticToken::new("t").bearer_token().as_deref(), Some("t"));
    }
}
