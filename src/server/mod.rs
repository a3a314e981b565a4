//! Server-side modules for the drillsync sync server.

pub mod api;
pub mod storage;

pub use api::{router, ApiKeyEntry, ApiKeyStore, AppState, AuthUser};
pub use storage::{ServerStore, ServerStoreError};
