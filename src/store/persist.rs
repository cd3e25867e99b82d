use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::tokens::TokenSet;
use crate::error::SyncError;

/// Durable storage for the token set (file, secret store, environment...).
///
/// Implementations must tolerate concurrent calls to themselves; last writer
/// wins. Compare-and-swap discipline lives in `TokenStore`, not here.
#[async_trait]
pub trait TokenPersistence: Send + Sync {
    /// Load the last saved token set, if any.
    async fn load_token_set(&self) -> Result<Option<TokenSet>, SyncError>;

    /// Durably save `tokens`, replacing whatever was stored.
    async fn save_token_set(&self, tokens: &TokenSet) -> Result<(), SyncError>;
}

/// In-process persistence, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tokens: Mutex<Option<TokenSet>>,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Last saved token set.
    pub fn saved(&self) -> Option<TokenSet> {
        self.tokens.lock().ok().and_then(|t| t.clone())
    }

    /// Number of successful `save_token_set` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenPersistence for MemoryPersistence {
    async fn load_token_set(&self) -> Result<Option<TokenSet>, SyncError> {
        let tokens = self
            .tokens
            .lock()
            .map_err(|_| SyncError::Persistence("memory store poisoned".into()))?;
        Ok(tokens.clone())
    }

    async fn save_token_set(&self, tokens: &TokenSet) -> Result<(), SyncError> {
        let mut slot = self
            .tokens
            .lock()
            .map_err(|_| SyncError::Persistence("memory store poisoned".into()))?;
        *slot = Some(tokens.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
