//! Identity graph store for first-party id synchronization.
//!
//! The graph holds three node types:
//!
//! - `Cookie`: the first-party id we mint, with its issue time
//! - `Browser`: a device fingerprint (user agent, address) and a sighting counter
//! - `Partner`: a partner's own id for the same browser
//!
//! Storage is a Dgraph alpha reached over its HTTP API. Every store operation
//! takes a [`TxnScope`] so callers can either let the store manage a
//! single-operation transaction or batch several operations in their own
//! [`Txn`].
//!
//! # Quick Start
//!
//! ```no_run
//! use idsync_graph::{Cookie, GraphConfig, GraphStore, TxnScope};
//!
//! # async fn example() -> idsync_graph::GraphResult<()> {
//! let store = GraphStore::from_config(GraphConfig::from_env())?;
//! store.create_schema().await?;
//!
//! let cookie = store
//!     .create_cookie(Cookie::new("xyz123"), TxnScope::Owned, true)
//!     .await?;
//! let found = store.find_cookie(&cookie.cookie_id, TxnScope::Owned).await?;
//! assert_eq!(found.uid, cookie.uid);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collapse;
pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod store;
pub mod txn;

pub use client::{AlterOp, DgraphClient, ACCESS_TOKEN_HEADER};
pub use collapse::{CollapseOutcome, CollapseSignal, Collapser, SkipReason, DEFAULT_BOT_PATTERN};
pub use config::GraphConfig;
pub use error::{GraphError, GraphResult};
pub use model::{Browser, Cookie, Partner};
pub use schema::SCHEMA;
pub use store::GraphStore;
pub use txn::{Txn, TxnScope};
