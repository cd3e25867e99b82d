//! End-to-end sync pass: list → translate → push, with bounded concurrency.
//!
//! The source listing is pulled lazily, one record at a time, and each record
//! becomes a push future in a `FuturesUnordered` capped at the concurrency
//! limit. Everything runs on the caller's task; suspension only happens at
//! network calls.

use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::result::{FailureReason, SyncResult, SyncTally};
use super::translate::{translate, LocationMap, TranslateError};
use crate::credentials::CredentialManager;
use crate::error::SyncError;
use crate::providers::{DestinationProvider, InventoryRecord, PushOutcome, SourceProvider};
use crate::retry::RetryPolicy;

pub const DEFAULT_CONCURRENCY: usize = 5;

/// How long a cancelled pass keeps listing to report what it skipped.
pub const DEFAULT_CANCEL_DRAIN_LIMIT: Duration = Duration::from_secs(10);

/// Lifecycle of one record within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    Translating,
    TranslationFailed,
    Pushing,
    /// Waiting out the backoff after failed attempt `n`.
    Retrying(u32),
    Succeeded,
    PermanentlyFailed,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Pending => f.write_str("pending"),
            RecordState::Translating => f.write_str("translating"),
            RecordState::TranslationFailed => f.write_str("translation_failed"),
            RecordState::Pushing => f.write_str("pushing"),
            RecordState::Retrying(n) => write!(f, "retrying({n})"),
            RecordState::Succeeded => f.write_str("succeeded"),
            RecordState::PermanentlyFailed => f.write_str("permanently_failed"),
        }
    }
}

struct RecordProgress<'a> {
    sku: &'a str,
    state: RecordState,
}

impl<'a> RecordProgress<'a> {
    fn new(sku: &'a str) -> Self {
        Self {
            sku,
            state: RecordState::Pending,
        }
    }

    fn advance(&mut self, next: RecordState) {
        trace!(sku = self.sku, from = %self.state, to = %next, "Record state");
        self.state = next;
    }
}

struct RecordOutcome {
    sku: String,
    result: Result<(), FailureReason>,
}

/// Drives one synchronization pass from source to destination.
pub struct SyncOrchestrator {
    credentials: Arc<CredentialManager>,
    source: Arc<dyn SourceProvider>,
    destination: Arc<dyn DestinationProvider>,
    locations: LocationMap,
    push_retry: RetryPolicy,
    cancel_drain_limit: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        credentials: Arc<CredentialManager>,
        source: Arc<dyn SourceProvider>,
        destination: Arc<dyn DestinationProvider>,
        locations: LocationMap,
    ) -> Self {
        Self {
            credentials,
            source,
            destination,
            locations,
            push_retry: RetryPolicy::default(),
            cancel_drain_limit: DEFAULT_CANCEL_DRAIN_LIMIT,
        }
    }

    /// Retry budget for throttled or transiently failing pushes.
    pub fn with_push_retry(mut self, retry: RetryPolicy) -> Self {
        self.push_retry = retry;
        self
    }

    /// Time budget for listing the records a cancelled pass skips.
    pub fn with_cancel_drain_limit(mut self, limit: Duration) -> Self {
        self.cancel_drain_limit = limit;
        self
    }

    /// Run one pass to completion.
    pub async fn run(&self, concurrency_limit: usize) -> Result<SyncResult, SyncError> {
        self.run_with_cancellation(concurrency_limit, &CancellationToken::new())
            .await
    }

    /// Run one pass, stopping dispatch when `cancel` fires.
    ///
    /// Record-level problems end up in the returned `SyncResult`. Only
    /// systemic failures (credentials, listing, misconfiguration) return an
    /// error, after in-flight pushes have settled.
    #[instrument(
        skip(self, cancel),
        fields(source = self.source.id(), destination = self.destination.id())
    )]
    pub async fn run_with_cancellation(
        &self,
        concurrency_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        if concurrency_limit == 0 {
            return Err(SyncError::Config("concurrency limit must be positive".into()));
        }

        // Broken credentials abort before a single record is touched.
        self.credentials.get_valid_token().await?;

        info!(concurrency_limit, "Starting inventory sync pass");
        let mut records = self.source.list();
        let mut in_flight = FuturesUnordered::new();
        let mut tally = SyncTally::default();
        let mut abort: Option<SyncError> = None;
        let mut listing_done = false;

        while !listing_done && abort.is_none() && !cancel.is_cancelled() {
            if in_flight.len() >= concurrency_limit {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    Some(done) = in_flight.next() => settle(&mut tally, &mut abort, done),
                }
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                    settle(&mut tally, &mut abort, done);
                }
                next = records.next() => match next {
                    Some(Ok(record)) => in_flight.push(self.process_record(record)),
                    Some(Err(e)) => {
                        error!("Source listing failed: {e}");
                        abort = Some(e);
                    }
                    None => listing_done = true,
                },
            }
        }

        let interrupted = !listing_done && abort.is_none() && cancel.is_cancelled();
        if !in_flight.is_empty() {
            debug!(in_flight = in_flight.len(), "Waiting for in-flight pushes");
        }
        while let Some(done) = in_flight.next().await {
            settle(&mut tally, &mut abort, done);
        }

        if let Some(e) = abort {
            error!("Sync pass aborted: {e}");
            return Err(e);
        }

        if interrupted {
            warn!(
                limit_secs = self.cancel_drain_limit.as_secs_f64(),
                "Sync pass cancelled; listing remaining records without pushing"
            );
            let drain = async {
                while let Some(next) = records.next().await {
                    match next {
                        Ok(record) => {
                            tally.cancelled(record.sku);
                            if tally.cancelled_count() % 100 == 0 {
                                debug!(cancelled = tally.cancelled_count(), "Still draining listing");
                            }
                        }
                        Err(e) => {
                            warn!("Listing stopped while collecting cancelled records: {e}");
                            break;
                        }
                    }
                }
            };
            if tokio::time::timeout(self.cancel_drain_limit, drain).await.is_err() {
                warn!(
                    cancelled = tally.cancelled_count(),
                    "Gave up draining the listing; cancelled records are incomplete"
                );
                tally.listing_truncated();
            }
        }

        let result = tally.finish(interrupted);
        info!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed.len(),
            cancelled = result.cancelled.len(),
            "Sync pass complete"
        );
        Ok(result)
    }

    /// Translate and push one record. `Err` is reserved for fatal errors.
    async fn process_record(&self, record: InventoryRecord) -> Result<RecordOutcome, SyncError> {
        let mut progress = RecordProgress::new(&record.sku);
        let outcome = |result| RecordOutcome {
            sku: record.sku.clone(),
            result,
        };

        progress.advance(RecordState::Translating);
        let update = match translate(&record, &self.locations) {
            Ok(update) => update,
            Err(TranslateError::UnmappedLocation { location_id, .. }) => {
                progress.advance(RecordState::TranslationFailed);
                warn!(sku = %record.sku, location_id = %location_id, "No warehouse mapping for location");
                return Ok(outcome(Err(FailureReason::UnmappedLocation { location_id })));
            }
        };

        let mut attempt = 1;
        loop {
            progress.advance(RecordState::Pushing);
            let retryable = match self.destination.push(&update).await {
                Ok(PushOutcome::Accepted) => {
                    progress.advance(RecordState::Succeeded);
                    return Ok(outcome(Ok(())));
                }
                Ok(PushOutcome::Rejected(reason)) => {
                    progress.advance(RecordState::PermanentlyFailed);
                    warn!(sku = %record.sku, "Destination rejected update: {reason}");
                    return Ok(outcome(Err(FailureReason::ProviderRejected(reason))));
                }
                Ok(PushOutcome::Throttled) => FailureReason::Throttled { attempts: attempt },
                Err(e) if e.is_transient() => FailureReason::TransientNetwork(e.to_string()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    progress.advance(RecordState::PermanentlyFailed);
                    warn!(sku = %record.sku, "Push failed: {e}");
                    return Ok(outcome(Err(FailureReason::Provider(e.to_string()))));
                }
            };

            if !self.push_retry.should_retry(attempt) {
                progress.advance(RecordState::PermanentlyFailed);
                warn!(sku = %record.sku, attempt, "Giving up on push: {retryable}");
                return Ok(outcome(Err(retryable)));
            }

            progress.advance(RecordState::Retrying(attempt));
            debug!(sku = %record.sku, attempt, "Push not accepted, backing off: {retryable}");
            self.push_retry.backoff(attempt).await;
            attempt += 1;
        }
    }
}

fn settle(
    tally: &mut SyncTally,
    abort: &mut Option<SyncError>,
    done: Result<RecordOutcome, SyncError>,
) {
    match done {
        Ok(RecordOutcome { result: Ok(()), .. }) => tally.succeeded(),
        Ok(RecordOutcome { sku, result: Err(reason) }) => tally.failed(sku, reason),
        Err(e) => {
            if abort.is_none() {
                *abort = Some(e);
            }
        }
    }
}
