//! Credential lifecycle for the source marketplace.

mod manager;

pub use manager::{CredentialManager, CredentialSettings};
