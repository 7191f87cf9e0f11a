//! Client library for the PsiCash transaction server.
//!
//! All client state (tokens, balance, purchases, prices, clock skew and
//! request metadata) lives in one JSON document on disk, managed by
//! [`core::datastore::Datastore`]. [`userdata::UserData`] gives it a typed
//! schema, and [`engine::PsiCash`] drives it through server round-trips.
//!
//! # Examples
//!
//! Direct datastore usage:
//! ```
//! use psicash::core::datastore::Datastore;
//!
//! let dir = tempfile::tempdir().expect("tmp");
//! let ds = Datastore::new();
//! ds.init(dir.path(), ".test").expect("init");
//!
//! ds.begin_transaction().expect("begin");
//! ds.set("/user/balance", 100i64, true).expect("set");
//! ds.set("/user/isAccount", false, true).expect("set");
//! ds.end_transaction(true).expect("commit");
//!
//! assert_eq!(ds.get::<i64>("/user/balance"), Ok(100));
//! ```
//!
//! Client usage with a caller-supplied HTTP function:
//! ```no_run
//! use psicash::engine::{HttpParams, HttpResult, PsiCash, PsiCashConfig};
//!
//! fn send(params: &HttpParams) -> HttpResult {
//!     // Perform the request with any HTTP client.
//!     HttpResult::transport_error(HttpResult::RECOVERABLE_ERROR, format!("offline: {}", params.path))
//! }
//!
//! let config = PsiCashConfig {
//!     user_agent: "example-client".to_string(),
//!     file_store_root: "/var/lib/example".into(),
//!     ..PsiCashConfig::default()
//! };
//! let psicash = PsiCash::init(config).expect("init").with_requester(send);
//! let refreshed = psicash.refresh_state(&["speed-boost"], false).expect("refresh");
//! println!("{:?}, balance {}", refreshed.status, psicash.balance().expect("balance"));
//! ```
#![warn(missing_docs)]

/// Durable document store.
pub mod core;
/// UTC timestamps.
pub mod datetime;
/// Server protocol engine.
pub mod engine;
/// Error type with criticality and context.
pub mod error;
/// File persistence for the document store.
pub mod persist;
/// Purchase, authorization, price and token records.
pub mod purchase;
/// Shared primitive types and outcome codes.
pub mod types;
/// Typed repository over the document store.
pub mod userdata;
