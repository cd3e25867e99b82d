use serde::Serialize;
use std::fmt;

/// Why a single record did not reach the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    UnmappedLocation { location_id: String },
    ProviderRejected(String),
    /// Still throttled after exhausting the retry budget.
    Throttled { attempts: u32 },
    /// Network failures outlasted the retry budget.
    TransientNetwork(String),
    Provider(String),
}

impl FailureReason {
    /// Stable label for reports and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::UnmappedLocation { .. } => "UnmappedLocationError",
            FailureReason::ProviderRejected(_) => "ProviderRejected",
            FailureReason::Throttled { .. } => "Throttled",
            FailureReason::TransientNetwork(_) => "TransientNetworkError",
            FailureReason::Provider(_) => "ProviderError",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnmappedLocation { location_id } => {
                write!(f, "no warehouse mapped for location '{location_id}'")
            }
            FailureReason::ProviderRejected(reason) => write!(f, "rejected: {reason}"),
            FailureReason::Throttled { attempts } => {
                write!(f, "throttled on all {attempts} attempts")
            }
            FailureReason::TransientNetwork(e) => write!(f, "network: {e}"),
            FailureReason::Provider(e) => write!(f, "provider: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub sku: String,
    pub reason: FailureReason,
}

/// Summary of one orchestrator pass.
///
/// `failed` is in completion order, not source order.
/// `total == succeeded + failed.len() + cancelled.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<RecordFailure>,
    /// Records listed but never dispatched because the pass was cancelled.
    pub cancelled: Vec<String>,
    /// Whether the pass stopped on a cancellation signal.
    pub interrupted: bool,
    /// `cancelled` stops short: listing the skipped records ran out of time.
    pub listing_truncated: bool,
}

impl SyncResult {
    pub fn failure_for(&self, sku: &str) -> Option<&FailureReason> {
        self.failed.iter().find(|f| f.sku == sku).map(|f| &f.reason)
    }

    pub fn failed_skus(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.sku.as_str()).collect()
    }
}

/// Mutable accumulator; frozen into a `SyncResult` when the pass ends.
#[derive(Debug, Default)]
pub(crate) struct SyncTally {
    succeeded: usize,
    failed: Vec<RecordFailure>,
    cancelled: Vec<String>,
    listing_truncated: bool,
}

impl SyncTally {
    pub(crate) fn succeeded(&mut self) {
        self.succeeded += 1;
    }

    pub(crate) fn failed(&mut self, sku: String, reason: FailureReason) {
        self.failed.push(RecordFailure { sku, reason });
    }

    pub(crate) fn cancelled(&mut self, sku: String) {
        self.cancelled.push(sku);
    }

    pub(crate) fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }

    pub(crate) fn listing_truncated(&mut self) {
        self.listing_truncated = true;
    }

    pub(crate) fn finish(self, interrupted: bool) -> SyncResult {
        SyncResult {
            total: self.succeeded + self.failed.len() + self.cancelled.len(),
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
            interrupted,
            listing_truncated: self.listing_truncated,
        }
    }
}
