//! Self-healing OAuth credential lifecycle.
//!
//! `CredentialManager` hands out access tokens to any number of concurrent
//! callers. Tokens close to expiry are refreshed proactively; a provider 401
//! triggers a reactive refresh via `reject_token`. At most one refresh call is
//! in flight per process: callers arriving during a refresh await the same
//! shared future, and `TokenStore::compare_and_swap` keeps a late refresh from
//! overwriting a newer commit.

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SyncError;
use crate::providers::{OAuthProvider, TokenGrant};
use crate::retry::RetryPolicy;
use crate::store::{TokenSet, TokenStore};

#[derive(Debug, Clone)]
enum RefreshOutcome {
    Committed(TokenSet),
    /// Another writer changed the token set first; re-read it.
    Superseded,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<RefreshOutcome, SyncError>>>;

/// Tuning for token renewal.
#[derive(Debug, Clone, Copy)]
pub struct CredentialSettings {
    /// Tokens expiring within this margin are refreshed before use.
    pub safety_margin: Duration,
    /// Retry budget for transient refresh failures.
    pub retry: RetryPolicy,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::seconds(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Owns the OAuth refresh protocol for the single source credential set.
pub struct CredentialManager {
    store: Arc<TokenStore>,
    provider: Arc<dyn OAuthProvider>,
    settings: CredentialSettings,
    refresh_gate: Mutex<Option<RefreshFuture>>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<TokenStore>,
        provider: Arc<dyn OAuthProvider>,
        settings: CredentialSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
            refresh_gate: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Return an access token valid for at least the safety margin.
    ///
    /// No network call is made while the held token is fresh. A lost
    /// compare-and-swap re-runs the decision once.
    #[instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn get_valid_token(&self) -> Result<String, SyncError> {
        for pass in 1..=2 {
            let current = self.store.read().await?;
            if !current.expires_within(self.settings.safety_margin, Utc::now()) {
                return Ok(current.access_token);
            }

            debug!(pass, expires_at = %current.expires_at, "Access token stale, refreshing");
            match self.refresh_from(&current).await? {
                RefreshOutcome::Committed(tokens) => return Ok(tokens.access_token),
                RefreshOutcome::Superseded => continue,
            }
        }

        let current = self.store.read().await?;
        if current.expires_within(self.settings.safety_margin, Utc::now()) {
            return Err(SyncError::Internal(
                "token refresh did not converge after concurrent updates".into(),
            ));
        }
        Ok(current.access_token)
    }

    /// Report that the provider refused `access_token` (HTTP 401).
    ///
    /// Refreshes if that token is still the one held; a rejection of an
    /// already-replaced token is ignored.
    #[instrument(skip_all, fields(provider = self.provider.id()))]
    pub async fn reject_token(&self, access_token: &str) -> Result<(), SyncError> {
        let current = self.store.read().await?;
        if current.access_token != access_token {
            debug!("Rejected token already replaced");
            return Ok(());
        }

        warn!("Provider refused the current access token, forcing refresh");
        self.refresh_from(&current).await.map(|_| ())
    }

    /// Authorization-code handshake; installs a brand-new token set.
    #[instrument(skip_all, fields(provider = self.provider.id()))]
    pub async fn complete_handshake(&self, code: &str, redirect_uri: &str) -> Result<(), SyncError> {
        let grant = self.provider.exchange_code(code, redirect_uri).await?;
        let tokens = grant.into_token_set(None, Utc::now())?;

        self.store.replace(tokens).await?;
        info!("Authorization handshake complete");
        Ok(())
    }

    /// Revoke the refresh token at the provider and drop the local copy.
    pub async fn revoke(&self) -> Result<(), SyncError> {
        let current = self.store.read().await?;
        let revoked = self.provider.revoke(&current.refresh_token).await;
        self.store.invalidate().await;
        info!("Credentials revoked");
        revoked
    }

    /// Join the in-flight refresh, or start one from `expected`.
    async fn refresh_from(&self, expected: &TokenSet) -> Result<RefreshOutcome, SyncError> {
        let refresh = {
            let mut gate = self.refresh_gate.lock().await;
            let joinable = gate.as_ref().filter(|f| f.peek().is_none()).cloned();

            match joinable {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight
                }
                None => {
                    // A refresh may have committed after `expected` was read.
                    if self.store.read().await? != *expected {
                        return Ok(RefreshOutcome::Superseded);
                    }

                    let refresh = refresh_and_commit(
                        self.store.clone(),
                        self.provider.clone(),
                        self.settings.retry,
                        expected.clone(),
                    )
                    .boxed()
                    .shared();
                    *gate = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }
}

async fn refresh_and_commit(
    store: Arc<TokenStore>,
    provider: Arc<dyn OAuthProvider>,
    retry: RetryPolicy,
    expected: TokenSet,
) -> Result<RefreshOutcome, SyncError> {
    let grant = match refresh_with_retry(provider.as_ref(), &expected.refresh_token, retry).await {
        Ok(grant) => grant,
        Err(e @ SyncError::CredentialExpired(_)) => {
            error!(
                "Refresh token rejected by {}; re-authorization required: {e}",
                provider.id()
            );
            store.invalidate_if(&expected).await;
            return Err(e);
        }
        Err(e) => {
            error!("Token refresh failed for {}: {e}", provider.id());
            return Err(e);
        }
    };

    let next = match grant.into_token_set(Some(&expected.refresh_token), Utc::now()) {
        Ok(next) => next,
        Err(e) => {
            error!("Unusable token response from {}: {e}", provider.id());
            return Err(e);
        }
    };

    if store.compare_and_swap(&expected, next.clone()).await {
        info!(expires_at = %next.expires_at, "Access token refreshed for {}", provider.id());
        Ok(RefreshOutcome::Committed(next))
    } else {
        warn!("Discarding refreshed token; token set changed concurrently");
        Ok(RefreshOutcome::Superseded)
    }
}

async fn refresh_with_retry(
    provider: &dyn OAuthProvider,
    refresh_token: &str,
    retry: RetryPolicy,
) -> Result<TokenGrant, SyncError> {
    let mut attempt = 1;
    loop {
        match provider.refresh_token(refresh_token).await {
            Ok(grant) => return Ok(grant),
            Err(e) if e.is_transient() && retry.should_retry(attempt) => {
                warn!(
                    "Token refresh attempt {attempt}/{} failed: {e}",
                    retry.max_attempts
                );
                retry.backoff(attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
