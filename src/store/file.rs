//! File-backed token persistence: a JSON document (optionally encrypted) or
//! in-place rotation of the token lines of a dotenv file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::persist::TokenPersistence;
use super::tokens::TokenSet;
use crate::crypto::CryptoEngine;
use crate::error::SyncError;

pub const ACCESS_TOKEN_KEY: &str = "EBAY_OAUTH_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "EBAY_REFRESH_TOKEN";
pub const EXPIRES_AT_KEY: &str = "EBAY_TOKEN_EXPIRES_AT";

/// Write `contents` next to `path` and rename over it.
async fn write_atomically(path: &Path, contents: &str) -> Result<(), SyncError> {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_if_exists(path: &Path) -> Result<Option<String>, SyncError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON document
// ─────────────────────────────────────────────────────────────────────────────

/// Token set stored as a JSON document, encrypted when a key is configured.
pub struct JsonFilePersistence {
    path: PathBuf,
    crypto: Option<CryptoEngine>,
    write_lock: Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>, crypto: Option<CryptoEngine>) -> Self {
        Self {
            path: path.into(),
            crypto,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl TokenPersistence for JsonFilePersistence {
    async fn load_token_set(&self) -> Result<Option<TokenSet>, SyncError> {
        let Some(contents) = read_if_exists(&self.path).await? else {
            return Ok(None);
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let json = match &self.crypto {
            Some(crypto) => crypto.decrypt(&contents)?,
            None => contents,
        };

        serde_json::from_str(&json).map(Some).map_err(|e| {
            SyncError::Persistence(format!("corrupt token file {}: {e}", self.path.display()))
        })
    }

    async fn save_token_set(&self, tokens: &TokenSet) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| SyncError::Persistence(format!("failed to encode token set: {e}")))?;
        let contents = match &self.crypto {
            Some(crypto) => crypto.encrypt(&json)?,
            None => json,
        };

        let _guard = self.write_lock.lock().await;
        write_atomically(&self.path, &contents).await?;
        debug!("Token set written to {}", self.path.display());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// dotenv file
// ─────────────────────────────────────────────────────────────────────────────

/// Token set kept as `EBAY_*` lines of a dotenv file.
///
/// Saving rewrites only the three token keys, appending any that are
/// missing, and leaves every other line untouched.
pub struct EnvFilePersistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EnvFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

fn line_key(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, _) = line.split_once('=')?;
    Some(key.trim())
}

/// Rewrite the token keys of a dotenv document.
fn rotate_env_lines(existing: &str, tokens: &TokenSet) -> String {
    let mut pending: Vec<(&str, String)> = vec![
        (ACCESS_TOKEN_KEY, tokens.access_token.clone()),
        (REFRESH_TOKEN_KEY, tokens.refresh_token.clone()),
        (EXPIRES_AT_KEY, tokens.expires_at.to_rfc3339()),
    ];

    let mut out = String::with_capacity(existing.len() + 256);
    for line in existing.lines() {
        let replacement = line_key(line)
            .and_then(|key| pending.iter().position(|(k, _)| *k == key))
            .map(|idx| pending.remove(idx));

        match replacement {
            Some((key, value)) => out.push_str(&format!("{key}='{value}'")),
            None => out.push_str(line),
        }
        out.push('\n');
    }

    for (key, value) in pending {
        out.push_str(&format!("{key}='{value}'\n"));
    }
    out
}

#[async_trait]
impl TokenPersistence for EnvFilePersistence {
    async fn load_token_set(&self) -> Result<Option<TokenSet>, SyncError> {
        let Some(contents) = read_if_exists(&self.path).await? else {
            return Ok(None);
        };

        let mut vars = HashMap::new();
        for item in dotenvy::from_read_iter(contents.as_bytes()) {
            let (key, value) = item.map_err(|e| {
                SyncError::Persistence(format!("invalid env file {}: {e}", self.path.display()))
            })?;
            vars.insert(key, value);
        }

        let (Some(access_token), Some(refresh_token)) = (
            vars.remove(ACCESS_TOKEN_KEY).filter(|v| !v.is_empty()),
            vars.remove(REFRESH_TOKEN_KEY).filter(|v| !v.is_empty()),
        ) else {
            return Ok(None);
        };

        // Without a recorded expiry the access token is treated as stale.
        let expires_at = vars
            .get(EXPIRES_AT_KEY)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();

        Ok(Some(TokenSet {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    async fn save_token_set(&self, tokens: &TokenSet) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().await;
        let existing = read_if_exists(&self.path).await?.unwrap_or_default();
        write_atomically(&self.path, &rotate_env_lines(&existing, tokens)).await?;
        debug!("Token keys rotated in {}", self.path.display());
        Ok(())
    }
}
