//! Full passes: eBay listing → translation → Temu push, over mock HTTP.

mod common;

use base64::Engine;
use common::*;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inventory_sync::crypto::CryptoEngine;
use inventory_sync::providers::{EbayInventory, EbayOAuth, TemuDestination, EBAY_DEFAULT_SCOPES};
use inventory_sync::store::{JsonFilePersistence, TokenPersistence};
use inventory_sync::sync::{FailureReason, LocationMap};
use inventory_sync::{CredentialManager, CredentialSettings, SyncError, SyncOrchestrator, TokenStore};

async fn mount_temu(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "temu-token",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/goods/update"))
        .and(body_partial_json(json!({"external_goods_id": "A3"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "listing is locked for review",
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/goods/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(server)
        .await;
}

fn locations() -> LocationMap {
    LocationMap::parse("L1=W1").unwrap()
}

#[tokio::test]
async fn test_pass_refreshes_lists_and_pushes() {
    let ebay = MockServer::start().await;
    let temu = MockServer::start().await;
    mount_temu(&temu).await;

    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ebay_token_response("fresh", Some("rt-2"))),
        )
        .expect(1)
        .mount(&ebay)
        .await;
    Mock::given(method("GET"))
        .and(path("/sell/inventory/v1/inventory_item"))
        .and(wiremock::matchers::query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ebay_page(
            vec![ebay_item("A1", 5, Some("L1")), ebay_item("A2", 0, Some("L9"))],
            Some("/sell/inventory/v1/inventory_item?limit=2&offset=2"),
        )))
        .mount(&ebay)
        .await;
    Mock::given(method("GET"))
        .and(path("/sell/inventory/v1/inventory_item"))
        .and(wiremock::matchers::query_param("offset", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ebay_page(vec![ebay_item("A3", 2, Some("L1"))], None)),
        )
        .mount(&ebay)
        .await;

    // Encrypted token file holding a token that is about to expire.
    let dir = tempfile::tempdir().unwrap();
    let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
    let token_path = dir.path().join("tokens.json");
    let persistence = Arc::new(JsonFilePersistence::new(
        &token_path,
        Some(CryptoEngine::new(&key).unwrap()),
    ));
    persistence
        .save_token_set(&token_set("stale", "rt-1", 5))
        .await
        .unwrap();

    let store = Arc::new(TokenStore::load(persistence).await.unwrap());
    let oauth = EbayOAuth::new(
        &server_url(&ebay),
        "app-id".into(),
        "app-secret".into(),
        EBAY_DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        reqwest::Client::new(),
    )
    .unwrap();
    let settings = CredentialSettings {
        retry: fast_retry(2),
        ..CredentialSettings::default()
    };
    let credentials = Arc::new(CredentialManager::new(store, Arc::new(oauth), settings));

    let source = EbayInventory::new(&server_url(&ebay), 2, credentials.clone(), reqwest::Client::new())
        .unwrap()
        .with_retry(fast_retry(2));
    let destination = TemuDestination::new(
        &server_url(&temu),
        "app-key".into(),
        "app-secret".into(),
        reqwest::Client::new(),
    )
    .unwrap();

    let orchestrator =
        SyncOrchestrator::new(credentials, Arc::new(source), Arc::new(destination), locations())
            .with_push_retry(fast_retry(3));
    let result = orchestrator.run(2).await.unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.succeeded, 1);
    assert!(!result.interrupted);
    assert_eq!(
        result.failure_for("A2"),
        Some(&FailureReason::UnmappedLocation { location_id: "L9".into() })
    );
    assert_eq!(
        result.failure_for("A3"),
        Some(&FailureReason::ProviderRejected("listing is locked for review".into()))
    );

    // The rotated refresh token survived to disk, encrypted.
    let on_disk = std::fs::read_to_string(&token_path).unwrap();
    assert!(!on_disk.contains("rt-2"));
    let reloaded = JsonFilePersistence::new(&token_path, Some(CryptoEngine::new(&key).unwrap()))
        .load_token_set()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.access_token, "fresh");
    assert_eq!(reloaded.refresh_token, "rt-2");
}

#[tokio::test]
async fn test_expired_refresh_token_aborts_before_any_push() {
    let ebay = MockServer::start().await;
    let temu = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token expired",
        })))
        .mount(&ebay)
        .await;
    Mock::given(method("GET"))
        .and(path("/sell/inventory/v1/inventory_item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ebay_page(vec![], None)))
        .expect(0)
        .mount(&ebay)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/goods/update"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&temu)
        .await;

    let (credentials, _) = ebay_credentials(&ebay, token_set("stale", "rt-dead", -60)).await;
    let source = EbayInventory::new(&server_url(&ebay), 50, credentials.clone(), reqwest::Client::new())
        .unwrap();
    let destination = TemuDestination::new(
        &server_url(&temu),
        "app-key".into(),
        "app-secret".into(),
        reqwest::Client::new(),
    )
    .unwrap();

    let orchestrator =
        SyncOrchestrator::new(credentials, Arc::new(source), Arc::new(destination), locations());
    let err = orchestrator.run(5).await.unwrap_err();

    assert!(matches!(err, SyncError::CredentialExpired(_)));
}
