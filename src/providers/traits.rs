use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::store::TokenSet;

/// Tokens returned from an OAuth provider after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Lifetime assumed when the provider omits `expires_in`.
    pub const DEFAULT_TTL_SECS: u64 = 7200;

    /// Build the stored token set, keeping `previous_refresh` when the
    /// provider did not rotate the refresh token.
    pub fn into_token_set(
        self,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenSet, SyncError> {
        let refresh_token = self
            .refresh_token
            .filter(|rt| !rt.is_empty())
            .or_else(|| previous_refresh.map(str::to_owned))
            .ok_or_else(|| SyncError::Provider("token response carried no refresh token".into()))?;
        let ttl = self.expires_in.unwrap_or(Self::DEFAULT_TTL_SECS);

        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token,
            expires_at: token_expiry(now, i64::try_from(ttl).unwrap_or(i64::MAX))?,
        })
    }
}

/// Longest token lifetime honoured; larger `expires_in` values are clamped.
pub const MAX_TOKEN_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Absolute expiry for a provider-reported lifetime in seconds.
pub(crate) fn token_expiry(now: DateTime<Utc>, ttl_secs: i64) -> Result<DateTime<Utc>, SyncError> {
    if ttl_secs < 0 {
        return Err(SyncError::Provider(format!(
            "token response has negative lifetime {ttl_secs}s"
        )));
    }

    now.checked_add_signed(Duration::seconds(ttl_secs.min(MAX_TOKEN_TTL_SECS)))
        .ok_or_else(|| SyncError::Provider(format!("token lifetime {ttl_secs}s is out of range")))
}

/// OAuth token endpoint of the source marketplace.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Unique provider identifier (e.g., "ebay").
    fn id(&self) -> &str;

    /// Exchange an authorization code for a fresh token pair.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, SyncError>;

    /// Exchange a refresh token for a new access token.
    ///
    /// A rejected refresh token (`invalid_grant`) must surface as
    /// `SyncError::CredentialExpired`; network trouble as
    /// `SyncError::TransientNetwork`.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, SyncError>;

    /// Revoke a token. Not all providers support this.
    async fn revoke(&self, _token: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inventory records
// ─────────────────────────────────────────────────────────────────────────────

/// Stock level of one SKU as reported by the source marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub sku: String,
    pub quantity: u32,
    pub location_id: String,
    pub last_modified: DateTime<Utc>,
}

/// Stock update in the destination marketplace's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingUpdate {
    pub external_id: String,
    pub available_qty: u32,
    pub warehouse_ref: String,
}

/// Result of a single destination push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Permanent rejection for this run; never retried.
    Rejected(String),
    /// Temporary rate-limit rejection; retry after a delay.
    Throttled,
}

/// Finite sequence of source records; pagination is handled inside.
pub type RecordStream<'a> = BoxStream<'a, Result<InventoryRecord, SyncError>>;

/// Marketplace that inventory is read from.
pub trait SourceProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Start a fresh listing from the first page.
    fn list(&self) -> RecordStream<'_>;
}

/// Marketplace that inventory updates are pushed to.
#[async_trait]
pub trait DestinationProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn push(&self, update: &ListingUpdate) -> Result<PushOutcome, SyncError>;
}
