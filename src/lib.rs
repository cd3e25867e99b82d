pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod providers;
pub mod retry;
pub mod store;
pub mod sync;

pub use config::Config;
pub use credentials::{CredentialManager, CredentialSettings};
pub use error::SyncError;
pub use retry::RetryPolicy;
pub use store::{TokenSet, TokenStore};
pub use sync::{SyncOrchestrator, SyncResult};
