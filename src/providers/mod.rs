mod ebay;
mod memory;
mod temu;
mod traits;

pub use ebay::{EbayInventory, EbayOAuth, DEFAULT_SCOPES as EBAY_DEFAULT_SCOPES};
pub use memory::{FixtureDestination, FixtureSource, ScriptedOAuthProvider};
pub use temu::TemuDestination;
pub use traits::{
    DestinationProvider, InventoryRecord, ListingUpdate, OAuthProvider, PushOutcome,
    RecordStream, SourceProvider, TokenGrant,
};

use std::time::Duration;

use crate::error::SyncError;

/// Shared HTTP client for marketplace adapters, optionally behind a proxy.
pub fn http_client(proxy_url: Option<&str>) -> Result<reqwest::Client, SyncError> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
    if let Some(proxy) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| SyncError::Config(format!("Invalid PROXY_URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))
}
