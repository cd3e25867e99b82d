//! eBay adapter tests against a mock Identity + Sell Inventory API.

mod common;

use common::*;
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inventory_sync::providers::{EbayInventory, InventoryRecord, SourceProvider};
use inventory_sync::SyncError;

const TOKEN_PATH: &str = "/identity/v1/oauth2/token";
const INVENTORY_PATH: &str = "/sell/inventory/v1/inventory_item";

async fn collect(source: &EbayInventory) -> Result<Vec<InventoryRecord>, SyncError> {
    source.list().try_collect().await
}

#[tokio::test]
async fn test_refresh_sends_basic_auth_and_keeps_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ebay_token_response("fresh", None)))
        .expect(1)
        .mount(&server)
        .await;

    let (credentials, persistence) = ebay_credentials(&server, token_set("stale", "rt-1", 10)).await;

    assert_eq!(credentials.get_valid_token().await.unwrap(), "fresh");
    // Fresh now; no second call.
    assert_eq!(credentials.get_valid_token().await.unwrap(), "fresh");

    let saved = persistence.saved().unwrap();
    assert_eq!(saved.access_token, "fresh");
    assert_eq!(saved.refresh_token, "rt-1");
}

#[tokio::test]
async fn test_refresh_token_rotation_is_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ebay_token_response("fresh", Some("rt-2"))),
        )
        .mount(&server)
        .await;

    let (credentials, persistence) = ebay_credentials(&server, token_set("stale", "rt-1", -1)).await;
    credentials.get_valid_token().await.unwrap();

    assert_eq!(persistence.saved().unwrap().refresh_token, "rt-2");
    assert_eq!(persistence.save_count(), 1);
}

#[tokio::test]
async fn test_invalid_grant_is_credential_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "the provided authorization refresh token is invalid or was issued to another client"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (credentials, persistence) = ebay_credentials(&server, token_set("stale", "rt-1", -1)).await;

    let err = credentials.get_valid_token().await.unwrap_err();
    assert!(matches!(err, SyncError::CredentialExpired(_)));
    assert!(!credentials.store().is_populated().await);
    assert_eq!(persistence.save_count(), 0);

    // Later callers fail fast without another network call.
    assert!(matches!(
        credentials.get_valid_token().await,
        Err(SyncError::CredentialExpired(_))
    ));
}

#[tokio::test]
async fn test_token_endpoint_outage_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(ebay_token_response("fresh", None)))
        .mount(&server)
        .await;

    let (credentials, _) = ebay_credentials(&server, token_set("stale", "rt-1", -1)).await;
    assert_eq!(credentials.get_valid_token().await.unwrap(), "fresh");
}

#[tokio::test]
async fn test_listing_follows_next_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .and(query_param("offset", "0"))
        .and(header("authorization", "Bearer live"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ebay_page(
            vec![ebay_item("A1", 5, Some("L1")), ebay_item("A2", 0, Some("L9"))],
            Some("/sell/inventory/v1/inventory_item?limit=2&offset=2"),
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .and(query_param("offset", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ebay_page(vec![ebay_item("A3", -4, None)], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (credentials, _) = ebay_credentials(&server, token_set("live", "rt-1", 3600)).await;
    let source = EbayInventory::new(&server_url(&server), 2, credentials, reqwest::Client::new())
        .unwrap()
        .with_default_location(Some("WAREHOUSE_DEFAULT".into()))
        .with_retry(fast_retry(2));

    let records = collect(&source).await.unwrap();

    let summary: Vec<_> = records
        .iter()
        .map(|r| (r.sku.as_str(), r.quantity, r.location_id.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![("A1", 5, "L1"), ("A2", 0, "L9"), ("A3", 0, "WAREHOUSE_DEFAULT")]
    );
}

#[tokio::test]
async fn test_listing_is_restartable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ebay_page(vec![ebay_item("A1", 1, Some("L1"))], None)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let (credentials, _) = ebay_credentials(&server, token_set("live", "rt-1", 3600)).await;
    let source = EbayInventory::new(&server_url(&server), 50, credentials, reqwest::Client::new()).unwrap();

    assert_eq!(collect(&source).await.unwrap().len(), 1);
    assert_eq!(collect(&source).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unauthorized_page_triggers_one_reactive_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(ebay_token_response("fresh", None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ebay_page(vec![ebay_item("A1", 3, Some("L1"))], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Looks valid locally, but the provider has revoked it.
    let (credentials, _) = ebay_credentials(&server, token_set("revoked", "rt-1", 3600)).await;
    let source = EbayInventory::new(&server_url(&server), 50, credentials.clone(), reqwest::Client::new())
        .unwrap();

    let records = collect(&source).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(credentials.get_valid_token().await.unwrap(), "fresh");
}

#[tokio::test]
async fn test_repeated_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(ebay_token_response("fresh", None)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let (credentials, _) = ebay_credentials(&server, token_set("revoked", "rt-1", 3600)).await;
    let source = EbayInventory::new(&server_url(&server), 50, credentials, reqwest::Client::new()).unwrap();

    assert!(matches!(collect(&source).await, Err(SyncError::Unauthorized(_))));
}

#[tokio::test]
async fn test_server_errors_are_retried_then_surface() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ebay_page(vec![ebay_item("A1", 3, Some("L1"))], None)),
        )
        .mount(&server)
        .await;

    let (credentials, _) = ebay_credentials(&server, token_set("live", "rt-1", 3600)).await;
    let source = EbayInventory::new(&server_url(&server), 50, credentials.clone(), reqwest::Client::new())
        .unwrap()
        .with_retry(fast_retry(3));
    assert_eq!(collect(&source).await.unwrap().len(), 1);

    let outage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(INVENTORY_PATH))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&outage)
        .await;
    let source = EbayInventory::new(&server_url(&outage), 50, credentials, reqwest::Client::new())
        .unwrap()
        .with_retry(fast_retry(2));
    assert!(matches!(collect(&source).await, Err(SyncError::TransientNetwork(_))));
}
