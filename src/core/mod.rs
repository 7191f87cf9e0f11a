//! Durable, transactional JSON document store.

/// Mutex-guarded, file-backed document with typed get/set and transactions.
pub mod datastore;
/// JSON-pointer path helpers.
pub mod path;
