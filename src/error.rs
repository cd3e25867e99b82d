/// Unified error type for the inventory sync service.
///
/// `Clone` because a single token refresh result is handed to every caller
/// waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    // ── Credential Errors ───────────────────────────────────────────────
    #[error("Credential expired: {0}")]
    CredentialExpired(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ── Network Errors ──────────────────────────────────────────────────
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    // ── Provider Errors ─────────────────────────────────────────────────
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Provider error: {0}")]
    Provider(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Errors that abort a whole sync pass instead of a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::CredentialExpired(_)
                | SyncError::Unauthorized(_)
                | SyncError::Config(_)
                | SyncError::Internal(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            SyncError::TransientNetwork(e.to_string())
        } else {
            SyncError::Provider(e.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        tracing::error!("Persistence I/O error: {e}");
        SyncError::Persistence(e.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(e: url::ParseError) -> Self {
        SyncError::Config(format!("invalid URL: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SyncError::TransientNetwork("reset".into()).is_transient());
        assert!(!SyncError::TransientNetwork("reset".into()).is_fatal());
        assert!(SyncError::CredentialExpired("invalid_grant".into()).is_fatal());
        assert!(!SyncError::ProviderRejected("bad sku".into()).is_fatal());
        assert!(!SyncError::Provider("decode".into()).is_transient());
    }
}
