//! Token store: the single shared mutable `TokenSet` and its persistence.

pub mod file;
pub mod persist;
pub mod tokens;

pub use file::{EnvFilePersistence, JsonFilePersistence};
pub use persist::{MemoryPersistence, TokenPersistence};
pub use tokens::{TokenSet, TokenStore};
