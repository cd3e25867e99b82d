//! Shared fixtures for the HTTP-level integration tests.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use url::Url;
use wiremock::MockServer;

use inventory_sync::providers::{EbayOAuth, EBAY_DEFAULT_SCOPES};
use inventory_sync::store::MemoryPersistence;
use inventory_sync::{CredentialManager, CredentialSettings, RetryPolicy, TokenSet, TokenStore};

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, StdDuration::from_millis(1), StdDuration::from_millis(5))
}

pub fn server_url(server: &MockServer) -> Url {
    Url::parse(&server.uri()).expect("mock server uri")
}

pub fn token_set(access: &str, refresh: &str, expires_in_secs: i64) -> TokenSet {
    TokenSet {
        access_token: access.into(),
        refresh_token: refresh.into(),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
    }
}

/// Credential manager wired to an eBay token endpoint on `server`.
pub async fn ebay_credentials(
    server: &MockServer,
    tokens: TokenSet,
) -> (Arc<CredentialManager>, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::with_tokens(tokens));
    let store = TokenStore::load(persistence.clone()).await.unwrap();
    let oauth = EbayOAuth::new(
        &server_url(server),
        "app-id".into(),
        "app-secret".into(),
        EBAY_DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        reqwest::Client::new(),
    )
    .unwrap();

    let settings = CredentialSettings {
        safety_margin: Duration::seconds(60),
        retry: fast_retry(3),
    };
    let manager = CredentialManager::new(Arc::new(store), Arc::new(oauth), settings);
    (Arc::new(manager), persistence)
}

pub fn ebay_token_response(access: &str, refresh: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access,
        "expires_in": 7200,
        "token_type": "User Access Token",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
        body["refresh_token_expires_in"] = json!(47304000);
    }
    body
}

pub fn ebay_item(sku: &str, quantity: i64, location: Option<&str>) -> Value {
    let distributions = match location {
        Some(key) => json!([{ "merchantLocationKey": key, "quantity": quantity }]),
        None => json!([]),
    };
    json!({
        "sku": sku,
        "product": { "title": format!("Test item {sku}") },
        "availability": {
            "shipToLocationAvailability": {
                "quantity": quantity,
                "availabilityDistributions": distributions,
            }
        }
    })
}

pub fn ebay_page(items: Vec<Value>, next: Option<&str>) -> Value {
    let mut page = json!({ "total": items.len(), "inventoryItems": items });
    if let Some(next) = next {
        page["next"] = json!(next);
    }
    page
}
