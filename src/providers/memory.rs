//! In-memory providers with scripted behaviour.
//!
//! These stand in for the real marketplaces in tests and dry runs: a fixed
//! inventory listing, a destination whose per-SKU outcomes can be scripted,
//! and an OAuth endpoint that replays queued responses.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::{
    DestinationProvider, InventoryRecord, ListingUpdate, OAuthProvider, PushOutcome,
    RecordStream, SourceProvider, TokenGrant,
};
use crate::error::SyncError;

fn poisoned() -> SyncError {
    SyncError::Internal("fixture lock poisoned".into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed inventory listing, optionally failing after a number of records.
pub struct FixtureSource {
    records: Vec<InventoryRecord>,
    fail_after: Option<(usize, SyncError)>,
    list_calls: AtomicUsize,
    latency: Duration,
}

impl FixtureSource {
    pub fn new(records: Vec<InventoryRecord>) -> Self {
        Self {
            records,
            fail_after: None,
            list_calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Simulated fetch latency before every listed item.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Yield `error` once `count` records have been listed.
    pub fn failing_after(mut self, count: usize, error: SyncError) -> Self {
        self.fail_after = Some((count, error));
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl SourceProvider for FixtureSource {
    fn id(&self) -> &str {
        "fixture-source"
    }

    fn list(&self) -> RecordStream<'_> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let (take, error) = match &self.fail_after {
            Some((count, error)) => (*count, Some(error.clone())),
            None => (self.records.len(), None),
        };

        let records = stream::iter(self.records.iter().take(take).cloned().map(Ok));
        let tail = stream::iter(error.map(Err));
        let latency = self.latency;
        if latency.is_zero() {
            return records.chain(tail).boxed();
        }

        records
            .chain(tail)
            .then(move |item| async move {
                tokio::time::sleep(latency).await;
                item
            })
            .boxed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Destination
// ─────────────────────────────────────────────────────────────────────────────

/// Destination that accepts everything unless told otherwise per external id.
#[derive(Default)]
pub struct FixtureDestination {
    scripted: Mutex<HashMap<String, VecDeque<Result<PushOutcome, SyncError>>>>,
    accepted: Mutex<Vec<ListingUpdate>>,
    push_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Duration,
}

impl FixtureDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated network latency for every push.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue outcomes for `external_id`; once drained, pushes are accepted.
    pub fn script(
        self,
        external_id: &str,
        outcomes: impl IntoIterator<Item = Result<PushOutcome, SyncError>>,
    ) -> Self {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted
                .entry(external_id.to_owned())
                .or_default()
                .extend(outcomes);
        }
        self
    }

    /// Reject every push for `external_id`.
    pub fn rejecting(self, external_id: &str, reason: &str) -> Self {
        let outcomes = std::iter::repeat_with(|| Ok(PushOutcome::Rejected(reason.to_owned()))).take(64);
        self.script(external_id, outcomes)
    }

    /// Updates accepted so far, in acceptance order.
    pub fn accepted(&self) -> Vec<ListingUpdate> {
        self.accepted.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Highest number of pushes observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationProvider for FixtureDestination {
    fn id(&self) -> &str {
        "fixture-destination"
    }

    async fn push(&self, update: &ListingUpdate) -> Result<PushOutcome, SyncError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .scripted
            .lock()
            .map_err(|_| poisoned())?
            .get_mut(&update.external_id)
            .and_then(VecDeque::pop_front);

        let outcome = scripted.unwrap_or(Ok(PushOutcome::Accepted));
        if let Ok(PushOutcome::Accepted) = outcome {
            self.accepted.lock().map_err(|_| poisoned())?.push(update.clone());
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OAuth
// ─────────────────────────────────────────────────────────────────────────────

/// OAuth endpoint replaying queued responses.
#[derive(Default)]
pub struct ScriptedOAuthProvider {
    refreshes: Mutex<VecDeque<Result<TokenGrant, SyncError>>>,
    exchanges: Mutex<VecDeque<Result<TokenGrant, SyncError>>>,
    revoked: Mutex<Vec<String>>,
    refresh_calls: AtomicUsize,
    latency: Duration,
}

impl ScriptedOAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// A bearer grant without refresh-token rotation.
    pub fn grant(access_token: &str, expires_in: u64) -> TokenGrant {
        TokenGrant {
            access_token: access_token.to_owned(),
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_in: Some(expires_in),
            scope: None,
        }
    }

    pub fn push_refresh(self, response: Result<TokenGrant, SyncError>) -> Self {
        if let Ok(mut queue) = self.refreshes.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn push_exchange(self, response: Result<TokenGrant, SyncError>) -> Self {
        if let Ok(mut queue) = self.exchanges.lock() {
            queue.push_back(response);
        }
        self
    }

    /// Number of refresh calls that reached the endpoint.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OAuthProvider for ScriptedOAuthProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenGrant, SyncError> {
        self.exchanges
            .lock()
            .map_err(|_| poisoned())?
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Provider("no scripted code exchange".into())))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant, SyncError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.refreshes
            .lock()
            .map_err(|_| poisoned())?
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Provider("no scripted refresh".into())))
    }

    async fn revoke(&self, token: &str) -> Result<(), SyncError> {
        self.revoked.lock().map_err(|_| poisoned())?.push(token.to_owned());
        Ok(())
    }
}
