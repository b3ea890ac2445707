//! HTTP surface of the cookie sync service.
//!
//! `GET {PATH_PREFIX}/csr?pcid=..&pid=..&hem=..&r=..` always answers with the
//! `muid` cookie, plus a 302 to the partner's rendered template when one was
//! supplied and decodes, or a 204 otherwise.

pub mod config;
pub mod http;
pub mod logging;

pub use config::{LogFormat, ServerConfig};
pub use http::{csr_path, router};
