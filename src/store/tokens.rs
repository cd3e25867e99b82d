//! In-process holder of the current OAuth token pair.
//!
//! All reads and writes of the shared `TokenSet` go through `TokenStore`,
//! which serializes swaps behind a write lock and persists each committed
//! value before the swap returns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use super::persist::TokenPersistence;
use crate::error::SyncError;

/// The access/refresh token pair currently authorizing source API calls.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// True if the access token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now.checked_add_signed(margin)
            .map_or(true, |deadline| deadline >= self.expires_at)
    }
}

// Tokens are bearer credentials; keep them out of logs.
impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Atomic holder of the process-wide `TokenSet`.
pub struct TokenStore {
    current: RwLock<Option<TokenSet>>,
    persistence: Arc<dyn TokenPersistence>,
    persist_failures: AtomicUsize,
}

impl TokenStore {
    /// Load whatever the persistence collaborator holds (possibly nothing).
    pub async fn load(persistence: Arc<dyn TokenPersistence>) -> Result<Self, SyncError> {
        let current = persistence.load_token_set().await?;
        match &current {
            Some(tokens) => info!("Loaded persisted token set (expires {})", tokens.expires_at),
            None => info!("No persisted token set found"),
        }

        Ok(Self {
            current: RwLock::new(current),
            persistence,
            persist_failures: AtomicUsize::new(0),
        })
    }

    /// Read the current token set.
    ///
    /// Fails with `CredentialExpired` once the store holds nothing, either
    /// because no handshake ever happened or because the tokens were
    /// invalidated.
    pub async fn read(&self) -> Result<TokenSet, SyncError> {
        self.current.read().await.clone().ok_or_else(|| {
            SyncError::CredentialExpired(
                "no valid token set held; re-run the authorization handshake".into(),
            )
        })
    }

    /// Whether any token set is currently held.
    pub async fn is_populated(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Replace the stored value with `next` only if it still equals `expected`.
    ///
    /// A successful swap is persisted before returning. If persisting fails
    /// the swap still stands in memory and `persistence_failures` goes up.
    pub async fn compare_and_swap(&self, expected: &TokenSet, next: TokenSet) -> bool {
        let mut current = self.current.write().await;
        if current.as_ref() != Some(expected) {
            return false;
        }

        if let Err(e) = self.persistence.save_token_set(&next).await {
            let failures = self.persist_failures.fetch_add(1, Ordering::SeqCst) + 1;
            error!(
                failures,
                expires_at = %next.expires_at,
                "Refreshed token set held in memory only, persisting failed: {e}"
            );
        }
        *current = Some(next);
        true
    }

    /// Committed swaps that could not be written to persistence.
    ///
    /// Non-zero means the on-disk token set is older than the one in use.
    pub fn persistence_failures(&self) -> usize {
        self.persist_failures.load(Ordering::SeqCst)
    }

    /// Install `tokens` unconditionally (initial handshake / operator reset).
    pub async fn replace(&self, tokens: TokenSet) -> Result<(), SyncError> {
        let mut current = self.current.write().await;
        self.persistence.save_token_set(&tokens).await?;
        *current = Some(tokens);
        Ok(())
    }

    /// Install `tokens` only when nothing is held yet. Returns whether it did.
    pub async fn seed(&self, tokens: TokenSet) -> Result<bool, SyncError> {
        let mut current = self.current.write().await;
        if current.is_some() {
            return Ok(false);
        }
        self.persistence.save_token_set(&tokens).await?;
        *current = Some(tokens);
        Ok(true)
    }

    /// Drop the held tokens if they still equal `expected`.
    pub async fn invalidate_if(&self, expected: &TokenSet) -> bool {
        let mut current = self.current.write().await;
        if current.as_ref() == Some(expected) {
            *current = None;
            return true;
        }
        false
    }

    /// Drop the held tokens unconditionally.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }
}
