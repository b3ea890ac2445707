//! Cookie sync protocol engine.
//!
//! A partner embeds a pixel pointing at the sync endpoint. Each hit resolves
//! the browser's first-party id (`muid`), remembers what the partner told us
//! about it in an [`IdentityCache`], and optionally bounces the browser back
//! to the partner with our id substituted into its URL.
//!
//! Graph consolidation is decoupled from the request path: when a
//! [`ConsolidationQueue`] is attached to the engine, every sync state is
//! handed to a [`ConsolidationWorker`] that folds it into the identity graph.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use idsync_core::{MokaCache, SyncEngine, SyncRequest, SyncResponse};
//!
//! let engine = SyncEngine::new(Arc::new(MokaCache::new(1_000)), "a.osintami.com");
//! let outcome = engine
//!     .sync(SyncRequest {
//!         redirect: "https://partner.example/?uid=${DEVICE_ID}".to_string(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//! let expected = format!("https://partner.example/?uid={}", outcome.cookie.value);
//! assert_eq!(outcome.response, SyncResponse::Redirect(expected));
//! ```

pub mod cache;
pub mod cookie;
pub mod engine;
pub mod error;
pub mod redirect;
pub mod state;
pub mod worker;

pub use cache::{IdentityCache, MokaCache};
pub use cookie::{parse_cookie_header, FirstPartyCookie, COOKIE_NAME, ONE_YEAR_SECONDS};
pub use engine::{SyncEngine, SyncOutcome, SyncRequest, SyncResponse};
pub use error::{DecodeError, SyncError, SyncResult};
pub use state::SyncState;
pub use worker::{Consolidate, ConsolidationQueue, ConsolidationWorker};
