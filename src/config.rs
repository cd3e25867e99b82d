use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::credentials::CredentialSettings;
use crate::providers::EBAY_DEFAULT_SCOPES;
use crate::retry::RetryPolicy;
use crate::sync::{LocationMap, DEFAULT_CANCEL_DRAIN_LIMIT, DEFAULT_CONCURRENCY};

/// On-disk layout of the persisted token set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStoreFormat {
    /// JSON document, optionally encrypted.
    Json,
    /// `KEY='value'` lines rewritten inside a dotenv file.
    Env,
}

impl FromStr for TokenStoreFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "env" | "dotenv" => Ok(Self::Env),
            other => bail!("unknown token store format '{other}' (expected json or env)"),
        }
    }
}

/// Application configuration, loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    // ── eBay (source) ───────────────────────────────────────────────────
    pub ebay_api_base_url: Url,
    pub ebay_app_id: String,
    pub ebay_app_secret: String,
    /// Initial access token, used when the token store is empty.
    pub ebay_oauth_token: Option<String>,
    pub ebay_refresh_token: Option<String>,
    /// One-time authorization code; exchanged on startup when present.
    pub ebay_auth_code: Option<String>,
    pub ebay_redirect_uri: Option<String>,
    pub ebay_scopes: Vec<String>,
    pub ebay_page_size: u32,
    /// Location assumed for items without a merchant location key.
    pub ebay_default_location: Option<String>,
    pub proxy_url: Option<String>,

    // ── Temu (destination) ──────────────────────────────────────────────
    pub temu_api_base_url: Url,
    pub temu_app_key: String,
    pub temu_app_secret: String,

    // ── Token persistence ───────────────────────────────────────────────
    pub token_store_path: PathBuf,
    pub token_store_format: TokenStoreFormat,
    /// 32-byte base64-encoded key for AES-256-GCM encryption at rest.
    pub token_encryption_key: Option<String>,
    pub token_safety_margin_secs: i64,

    // ── Sync tuning ─────────────────────────────────────────────────────
    pub sync_concurrency: usize,
    pub sync_max_attempts: u32,
    pub sync_backoff_base_ms: u64,
    pub sync_backoff_max_ms: u64,
    /// Seconds a cancelled pass spends listing the records it skipped.
    pub sync_cancel_drain_secs: u64,

    // ── Location mapping ────────────────────────────────────────────────
    /// Inline `L1=W1,L2=W2` entries; override the file.
    pub location_map: Option<String>,
    /// JSON object of location → warehouse.
    pub location_map_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{key} is required"));

        Ok(Self {
            ebay_api_base_url: parse_or(&var, "EBAY_API_BASE_URL", "https://api.ebay.com")?,
            ebay_app_id: required("EBAY_APP_ID")?,
            ebay_app_secret: required("EBAY_APP_SECRET")?,
            ebay_oauth_token: var("EBAY_OAUTH_TOKEN"),
            ebay_refresh_token: var("EBAY_REFRESH_TOKEN"),
            ebay_auth_code: var("EBAY_AUTH_CODE"),
            ebay_redirect_uri: var("EBAY_REDIRECT_URI"),
            ebay_scopes: var("EBAY_SCOPES")
                .map(|s| {
                    s.split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|scope| !scope.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_else(|| EBAY_DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()),
            ebay_page_size: parse_or(&var, "EBAY_PAGE_SIZE", "50")?,
            ebay_default_location: var("EBAY_DEFAULT_LOCATION"),
            proxy_url: var("PROXY_URL"),

            temu_api_base_url: parse_or(&var, "TEMU_API_BASE_URL", "http://127.0.0.1:8000")?,
            temu_app_key: required("TEMU_APP_KEY")?,
            temu_app_secret: required("TEMU_APP_SECRET")?,

            token_store_path: var("TOKEN_STORE_PATH")
                .unwrap_or_else(|| ".ebay_tokens.json".into())
                .into(),
            token_store_format: parse_or(&var, "TOKEN_STORE_FORMAT", "json")?,
            token_encryption_key: var("TOKEN_ENCRYPTION_KEY"),
            token_safety_margin_secs: parse_or(&var, "TOKEN_SAFETY_MARGIN_SECS", "60")?,

            sync_concurrency: parse_or(&var, "SYNC_CONCURRENCY", &DEFAULT_CONCURRENCY.to_string())?,
            sync_max_attempts: parse_or(&var, "SYNC_MAX_ATTEMPTS", "4")?,
            sync_backoff_base_ms: parse_or(&var, "SYNC_BACKOFF_BASE_MS", "500")?,
            sync_backoff_max_ms: parse_or(&var, "SYNC_BACKOFF_MAX_MS", "10000")?,
            sync_cancel_drain_secs: parse_or(
                &var,
                "SYNC_CANCEL_DRAIN_SECS",
                &DEFAULT_CANCEL_DRAIN_LIMIT.as_secs().to_string(),
            )?,

            location_map: var("LOCATION_MAP"),
            location_map_file: var("LOCATION_MAP_FILE").map(PathBuf::from),
        })
    }

    /// File entries first, inline entries on top.
    pub fn location_map(&self) -> Result<LocationMap> {
        let mut map = LocationMap::new();

        if let Some(path) = &self.location_map_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read LOCATION_MAP_FILE {}", path.display()))?;
            let from_file: LocationMap = serde_json::from_str(&raw)
                .with_context(|| format!("LOCATION_MAP_FILE {} is not a JSON object", path.display()))?;
            map.merge(from_file);
        }

        if let Some(inline) = &self.location_map {
            map.merge(LocationMap::parse(inline).context("Invalid LOCATION_MAP")?);
        }

        Ok(map)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.sync_max_attempts,
            Duration::from_millis(self.sync_backoff_base_ms),
            Duration::from_millis(self.sync_backoff_max_ms),
        )
    }

    pub fn cancel_drain_limit(&self) -> Duration {
        Duration::from_secs(self.sync_cancel_drain_secs)
    }

    pub fn credential_settings(&self) -> CredentialSettings {
        CredentialSettings {
            safety_margin: chrono::Duration::seconds(self.token_safety_margin_secs.clamp(0, 24 * 60 * 60)),
            retry: self.retry_policy(),
        }
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var(key).unwrap_or_else(|| default.to_owned());
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} '{raw}': {e}"))
}
