use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::traits::{token_expiry, DestinationProvider, ListingUpdate, PushOutcome};
use crate::error::SyncError;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Listing status reported by `/v1/goods/status` for a live listing.
const ACTIVE_STATUS: &str = "ACTIVE";

/// Temu goods API as a push destination.
///
/// Authenticates with its own app key / secret (client credentials); the
/// resulting bearer token is cached until shortly before it expires. A push
/// updates the listing, creates it when Temu does not know the SKU yet, and
/// confirms the listing status whenever Temu returns a goods id.
pub struct TemuDestination {
    http: reqwest::Client,
    token_url: Url,
    update_url: Url,
    create_url: Url,
    status_url: Url,
    app_key: String,
    app_secret: String,
    cached_token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        Utc::now()
            .checked_add_signed(Duration::seconds(60))
            .map_or(true, |deadline| deadline >= self.expires_at)
    }
}

#[derive(Debug, Deserialize)]
struct TemuTokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct GoodsRequest<'a> {
    external_goods_id: &'a str,
    quantity: u32,
    warehouse_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsResponse {
    success: Option<bool>,
    goods_id: Option<serde_json::Value>,
    message: Option<String>,
    error: Option<String>,
    detail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsStatusResponse {
    status: Option<String>,
}

/// Result of an update or create call.
enum GoodsWrite {
    Written { goods_id: Option<String> },
    /// Temu has no listing for this external id.
    Missing(String),
    Finished(PushOutcome),
}

impl TemuDestination {
    pub fn new(
        api_base_url: &Url,
        app_key: String,
        app_secret: String,
        http: reqwest::Client,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            http,
            token_url: api_base_url.join("/v1/oauth/token")?,
            update_url: api_base_url.join("/v1/goods/update")?,
            create_url: api_base_url.join("/v1/goods/create")?,
            status_url: api_base_url.join("/v1/goods/status")?,
            app_key,
            app_secret,
            cached_token: RwLock::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, SyncError> {
        {
            let cache = self.cached_token.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        // Concurrent pushes queue here; only the first one fetches.
        let mut cache = self.cached_token.write().await;
        if let Some(ref token) = *cache {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch_token().await?;
        debug!("Acquired Temu token, expires at {}", token.expires_at);
        *cache = Some(token.clone());
        Ok(token.access_token)
    }

    async fn fetch_token(&self) -> Result<CachedToken, SyncError> {
        let resp = self
            .http
            .post(self.token_url.clone())
            .json(&serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": self.app_key,
                "client_secret": self.app_secret,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::TransientNetwork(format!("Temu token endpoint returned {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Unauthorized(format!("Temu auth failed ({status}): {body}")));
        }

        let token_resp: TemuTokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Provider(format!("Failed to parse Temu token response: {e}")))?;

        let ttl = token_resp.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        Ok(CachedToken {
            access_token: token_resp.access_token,
            expires_at: token_expiry(Utc::now(), ttl)?,
        })
    }

    /// Drop the cached token if it is still the one Temu refused.
    async fn invalidate_token(&self, refused: &str) {
        let mut cache = self.cached_token.write().await;
        if cache.as_ref().is_some_and(|t| t.access_token == refused) {
            *cache = None;
        }
    }

    /// Send a bearer-authenticated request, re-authenticating once on 401.
    async fn send_authorized(
        &self,
        request: impl Fn(&str) -> RequestBuilder,
    ) -> Result<Response, SyncError> {
        let mut reauthorized = false;
        loop {
            let token = self.access_token().await?;
            let resp = request(&token).send().await?;

            if resp.status() != StatusCode::UNAUTHORIZED {
                return Ok(resp);
            }
            if reauthorized {
                return Err(SyncError::Unauthorized(
                    "Temu refused a freshly issued token".into(),
                ));
            }
            warn!("Temu refused cached token, re-authenticating");
            reauthorized = true;
            self.invalidate_token(&token).await;
        }
    }

    async fn write_goods(&self, url: &Url, body: &GoodsRequest<'_>) -> Result<GoodsWrite, SyncError> {
        let resp = self
            .send_authorized(|token| self.http.post(url.clone()).bearer_auth(token).json(body))
            .await?;

        let status = resp.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => Ok(GoodsWrite::Finished(PushOutcome::Throttled)),
            s if s.is_server_error() => {
                Err(SyncError::TransientNetwork(format!("Temu {} returned {s}", url.path())))
            }
            s => {
                let text = resp.text().await.unwrap_or_default();
                let parsed: GoodsResponse = serde_json::from_str(&text).unwrap_or_default();

                if s.is_success() && parsed.success != Some(false) {
                    return Ok(GoodsWrite::Written {
                        goods_id: parsed.goods_id.as_ref().and_then(goods_id_string),
                    });
                }

                let reason = rejection_reason(parsed, &text, s);
                if s == StatusCode::NOT_FOUND || is_missing_goods(&reason) {
                    Ok(GoodsWrite::Missing(reason))
                } else {
                    Ok(GoodsWrite::Finished(PushOutcome::Rejected(reason)))
                }
            }
        }
    }

    /// Confirm that `goods_id` is live after a successful write.
    async fn check_status(&self, goods_id: &str) -> Result<PushOutcome, SyncError> {
        let resp = self
            .send_authorized(|token| {
                self.http
                    .get(self.status_url.clone())
                    .bearer_auth(token)
                    .query(&[("goods_id", goods_id)])
            })
            .await?;

        let status = resp.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => Ok(PushOutcome::Throttled),
            StatusCode::NOT_FOUND => Ok(PushOutcome::Rejected(format!(
                "goods {goods_id} not found after push"
            ))),
            s if s.is_server_error() => {
                Err(SyncError::TransientNetwork(format!("Temu status check returned {s}")))
            }
            s if s.is_success() => {
                let parsed: GoodsStatusResponse = resp.json().await.unwrap_or_default();
                match parsed.status {
                    Some(listing) if !listing.eq_ignore_ascii_case(ACTIVE_STATUS) => Ok(
                        PushOutcome::Rejected(format!("goods {goods_id} is {listing}")),
                    ),
                    _ => Ok(PushOutcome::Accepted),
                }
            }
            s => {
                let text = resp.text().await.unwrap_or_default();
                let parsed: GoodsResponse = serde_json::from_str(&text).unwrap_or_default();
                Ok(PushOutcome::Rejected(rejection_reason(parsed, &text, s)))
            }
        }
    }
}

fn goods_id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_missing_goods(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains("not found")
}

fn rejection_reason(parsed: GoodsResponse, body: &str, status: StatusCode) -> String {
    parsed
        .message
        .or(parsed.error)
        .or(parsed.detail)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}: {body}"))
}

#[async_trait]
impl DestinationProvider for TemuDestination {
    fn id(&self) -> &str {
        "temu"
    }

    #[instrument(skip(self, update), fields(external_id = %update.external_id))]
    async fn push(&self, update: &ListingUpdate) -> Result<PushOutcome, SyncError> {
        let body = GoodsRequest {
            external_goods_id: &update.external_id,
            quantity: update.available_qty,
            warehouse_id: &update.warehouse_ref,
        };

        let goods_id = match self.write_goods(&self.update_url, &body).await? {
            GoodsWrite::Written { goods_id } => goods_id,
            GoodsWrite::Finished(outcome) => return Ok(outcome),
            GoodsWrite::Missing(reason) => {
                info!("No Temu listing yet ({reason}), creating one");
                match self.write_goods(&self.create_url, &body).await? {
                    GoodsWrite::Written { goods_id } => goods_id,
                    GoodsWrite::Finished(outcome) => return Ok(outcome),
                    GoodsWrite::Missing(reason) => return Ok(PushOutcome::Rejected(reason)),
                }
            }
        };

        match goods_id {
            Some(goods_id) => self.check_status(&goods_id).await,
            None => Ok(PushOutcome::Accepted),
        }
    }
}
