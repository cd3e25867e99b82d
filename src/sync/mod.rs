//! Source → destination synchronization.

mod orchestrator;
mod result;
mod translate;

pub use orchestrator::{
    RecordState, SyncOrchestrator, DEFAULT_CANCEL_DRAIN_LIMIT, DEFAULT_CONCURRENCY,
};
pub use result::{FailureReason, RecordFailure, SyncResult};
pub use translate::{translate, LocationMap, TranslateError};
