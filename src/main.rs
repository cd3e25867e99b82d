use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use inventory_sync::config::{Config, TokenStoreFormat};
use inventory_sync::crypto::CryptoEngine;
use inventory_sync::providers::{self, EbayInventory, EbayOAuth, TemuDestination};
use inventory_sync::store::{EnvFilePersistence, JsonFilePersistence, TokenPersistence};
use inventory_sync::{CredentialManager, SyncOrchestrator, TokenSet, TokenStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inventory_sync=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("inventory-sync v{}", env!("CARGO_PKG_VERSION"));

    let locations = config.location_map()?;
    if locations.is_empty() {
        warn!("Location map is empty; every record will fail translation");
    }
    info!("Loaded {} location mappings", locations.len());

    // Credentials
    let persistence = token_persistence(&config)?;
    let store = Arc::new(TokenStore::load(persistence).await?);
    let http = providers::http_client(config.proxy_url.as_deref())?;

    let oauth = EbayOAuth::new(
        &config.ebay_api_base_url,
        config.ebay_app_id.clone(),
        config.ebay_app_secret.clone(),
        config.ebay_scopes.clone(),
        http.clone(),
    )?;
    let credentials = Arc::new(CredentialManager::new(
        store.clone(),
        Arc::new(oauth),
        config.credential_settings(),
    ));
    bootstrap_credentials(&config, &credentials).await?;

    // Providers
    let source = EbayInventory::new(
        &config.ebay_api_base_url,
        config.ebay_page_size,
        credentials.clone(),
        http.clone(),
    )?
    .with_default_location(config.ebay_default_location.clone())
    .with_retry(config.retry_policy());
    let destination = TemuDestination::new(
        &config.temu_api_base_url,
        config.temu_app_key.clone(),
        config.temu_app_secret.clone(),
        http,
    )?;

    let orchestrator =
        SyncOrchestrator::new(credentials, Arc::new(source), Arc::new(destination), locations)
            .with_push_retry(config.retry_policy())
            .with_cancel_drain_limit(config.cancel_drain_limit());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight pushes");
            on_signal.cancel();
        }
    });

    let result = match orchestrator
        .run_with_cancellation(config.sync_concurrency, &cancel)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("Sync failed: {e}");
            return Err(e).context("inventory sync aborted");
        }
    };

    for failure in &result.failed {
        warn!(sku = %failure.sku, kind = failure.reason.kind(), "{}", failure.reason);
    }
    let unpersisted = store.persistence_failures();
    if unpersisted > 0 {
        warn!(
            unpersisted,
            "Token file {} is behind the tokens in use; check it is writable",
            config.token_store_path.display()
        );
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    info!(
        "Sync done ✓ {}/{} succeeded, {} failed, {} cancelled",
        result.succeeded,
        result.total,
        result.failed.len(),
        result.cancelled.len()
    );
    Ok(())
}

fn token_persistence(config: &Config) -> Result<Arc<dyn TokenPersistence>> {
    let path = config.token_store_path.clone();
    Ok(match config.token_store_format {
        TokenStoreFormat::Json => {
            let crypto = config
                .token_encryption_key
                .as_deref()
                .map(CryptoEngine::new)
                .transpose()
                .context("Invalid TOKEN_ENCRYPTION_KEY")?;
            if crypto.is_none() {
                warn!("TOKEN_ENCRYPTION_KEY not set; tokens are stored in plain text");
            }
            Arc::new(JsonFilePersistence::new(path, crypto))
        }
        TokenStoreFormat::Env => {
            if config.token_encryption_key.is_some() {
                warn!("TOKEN_ENCRYPTION_KEY is ignored for the env token store");
            }
            Arc::new(EnvFilePersistence::new(path))
        }
    })
}

/// Make sure the store holds a token set before the first pass.
async fn bootstrap_credentials(config: &Config, credentials: &CredentialManager) -> Result<()> {
    if let Some(code) = &config.ebay_auth_code {
        let redirect_uri = config
            .ebay_redirect_uri
            .as_deref()
            .context("EBAY_REDIRECT_URI is required with EBAY_AUTH_CODE")?;
        credentials
            .complete_handshake(code, redirect_uri)
            .await
            .context("Authorization code exchange failed")?;
        return Ok(());
    }

    if credentials.store().is_populated().await {
        return Ok(());
    }

    match (&config.ebay_oauth_token, &config.ebay_refresh_token) {
        (access, Some(refresh)) => {
            // Expiry unknown: stamp it as expired so the first use refreshes.
            let seeded = TokenSet {
                access_token: access.clone().unwrap_or_default(),
                refresh_token: refresh.clone(),
                expires_at: DateTime::<Utc>::UNIX_EPOCH,
            };
            credentials.store().seed(seeded).await?;
            info!("Seeded token store from EBAY_REFRESH_TOKEN");
            Ok(())
        }
        _ => bail!(
            "No eBay credentials: set EBAY_REFRESH_TOKEN, or EBAY_AUTH_CODE with EBAY_REDIRECT_URI"
        ),
    }
}
