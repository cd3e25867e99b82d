use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use super::traits::{InventoryRecord, OAuthProvider, RecordStream, SourceProvider, TokenGrant};
use crate::credentials::CredentialManager;
use crate::error::SyncError;
use crate::retry::RetryPolicy;

pub const DEFAULT_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope/sell.inventory.readonly",
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
];

// ─────────────────────────────────────────────────────────────────────────────
// OAuth
// ─────────────────────────────────────────────────────────────────────────────

/// eBay OAuth 2.0 token endpoint.
///
/// Quirks:
/// - Client credentials go in an HTTP Basic header, not the form body.
/// - Refresh responses never rotate the refresh token.
/// - A dead refresh token is reported as `invalid_grant` with status 400.
pub struct EbayOAuth {
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    token_url: Url,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EbayTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "User Access Token".into()
}

#[derive(Debug, Default, Deserialize)]
struct EbayOAuthError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl EbayOAuth {
    pub fn new(
        api_base_url: &Url,
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
        http: reqwest::Client,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            client_id,
            client_secret,
            scopes,
            token_url: api_base_url.join("/identity/v1/oauth2/token")?,
            http,
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, SyncError> {
        let resp = self
            .http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_token_error(status, &body));
        }

        let token_resp: EbayTokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Provider(format!("Failed to parse eBay token response: {e}")))?;

        Ok(TokenGrant {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            token_type: token_resp.token_type,
            expires_in: token_resp.expires_in,
            scope: Some(self.scopes.join(" ")),
        })
    }
}

/// Map a failed token endpoint response onto the error taxonomy.
fn classify_token_error(status: StatusCode, body: &str) -> SyncError {
    let err: EbayOAuthError = serde_json::from_str(body).unwrap_or_default();
    let detail = if err.error_description.is_empty() {
        body.to_string()
    } else {
        err.error_description.clone()
    };

    match err.error.as_str() {
        "invalid_grant" => SyncError::CredentialExpired(detail),
        "invalid_client" | "unauthorized_client" => {
            SyncError::Config(format!("eBay rejected the client credentials: {detail}"))
        }
        _ if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
            SyncError::TransientNetwork(format!("eBay token endpoint returned {status}"))
        }
        _ => SyncError::Provider(format!("eBay token request failed ({status}): {detail}")),
    }
}

#[async_trait]
impl OAuthProvider for EbayOAuth {
    fn id(&self) -> &str {
        "ebay"
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, SyncError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, SyncError> {
        let scope = self.scopes.join(" ");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", &scope),
        ])
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inventory listing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryPage {
    #[serde(default)]
    inventory_items: Vec<EbayInventoryItem>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EbayInventoryItem {
    sku: String,
    availability: Option<EbayAvailability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EbayAvailability {
    ship_to_location_availability: Option<ShipToLocationAvailability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShipToLocationAvailability {
    quantity: Option<i64>,
    #[serde(default)]
    availability_distributions: Vec<AvailabilityDistribution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityDistribution {
    merchant_location_key: Option<String>,
}

/// eBay Sell Inventory API as a paginated record source.
///
/// Every page request asks the credential manager for a token at call time,
/// so a refresh in the middle of a listing is picked up by the next page.
pub struct EbayInventory {
    http: reqwest::Client,
    first_page: Url,
    credentials: Arc<CredentialManager>,
    default_location: Option<String>,
    retry: RetryPolicy,
}

impl EbayInventory {
    pub fn new(
        api_base_url: &Url,
        page_size: u32,
        credentials: Arc<CredentialManager>,
        http: reqwest::Client,
    ) -> Result<Self, SyncError> {
        let mut first_page = api_base_url.join("/sell/inventory/v1/inventory_item")?;
        first_page
            .query_pairs_mut()
            .append_pair("limit", &page_size.max(1).to_string())
            .append_pair("offset", "0");

        Ok(Self {
            http,
            first_page,
            credentials,
            default_location: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Location assumed for items that carry no merchant location key.
    pub fn with_default_location(mut self, location: Option<String>) -> Self {
        self.default_location = location;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn fetch_page(&self, url: &Url) -> Result<InventoryPage, SyncError> {
        let mut attempt = 1;
        let mut reauthorized = false;

        loop {
            let token = self.credentials.get_valid_token().await?;
            let sent = self
                .http
                .get(url.clone())
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "application/json")
                .header(reqwest::header::CONTENT_LANGUAGE, "en-US")
                .send()
                .await;

            let failure = match sent {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json().await.map_err(|e| {
                        SyncError::Provider(format!("Failed to parse inventory page: {e}"))
                    });
                }
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                    if reauthorized {
                        return Err(SyncError::Unauthorized(
                            "eBay refused a freshly refreshed access token".into(),
                        ));
                    }
                    reauthorized = true;
                    self.credentials.reject_token(&token).await?;
                    continue;
                }
                Ok(resp)
                    if resp.status() == StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error() =>
                {
                    SyncError::TransientNetwork(format!("inventory page returned {}", resp.status()))
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(SyncError::Provider(format!(
                        "eBay inventory listing failed ({status}): {body}"
                    )));
                }
                Err(e) => SyncError::from(e),
            };

            if !failure.is_transient() || !self.retry.should_retry(attempt) {
                return Err(failure);
            }
            warn!(
                "Inventory page attempt {attempt}/{} failed: {failure}",
                self.retry.max_attempts
            );
            self.retry.backoff(attempt).await;
            attempt += 1;
        }
    }

    fn to_record(&self, item: EbayInventoryItem, fetched_at: DateTime<Utc>) -> InventoryRecord {
        let ship_to = item
            .availability
            .and_then(|a| a.ship_to_location_availability);

        let (quantity, location) = match ship_to {
            Some(ship_to) => {
                let location = ship_to
                    .availability_distributions
                    .into_iter()
                    .find_map(|d| d.merchant_location_key);
                (ship_to.quantity.unwrap_or(0), location)
            }
            None => (0, None),
        };

        if quantity < 0 {
            warn!(sku = %item.sku, quantity, "Negative quantity from eBay, clamping to 0");
        }

        InventoryRecord {
            quantity: quantity.clamp(0, i64::from(u32::MAX)) as u32,
            // Empty when unknown; translation reports it as unmapped.
            location_id: location
                .or_else(|| self.default_location.clone())
                .unwrap_or_default(),
            sku: item.sku,
            last_modified: fetched_at,
        }
    }
}

/// Resolve eBay's `next` link against the current page, stopping on a loop.
fn next_page(current: &Url, next: Option<&str>) -> Result<Option<Url>, SyncError> {
    let Some(next) = next.filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    let next = current.join(next)?;
    Ok((next != *current).then_some(next))
}

impl SourceProvider for EbayInventory {
    fn id(&self) -> &str {
        "ebay"
    }

    fn list(&self) -> RecordStream<'_> {
        stream::try_unfold(Some(self.first_page.clone()), move |cursor| async move {
            let Some(url) = cursor else {
                return Ok(None);
            };

            let page = self.fetch_page(&url).await?;
            let next = next_page(&url, page.next.as_deref())?;
            let fetched_at = Utc::now();
            debug!(
                items = page.inventory_items.len(),
                has_next = next.is_some(),
                "Fetched inventory page"
            );

            let records: Vec<InventoryRecord> = page
                .inventory_items
                .into_iter()
                .map(|item| self.to_record(item, fetched_at))
                .collect();
            Ok::<_, SyncError>(Some((records, next)))
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }
}
