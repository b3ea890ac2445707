//! The first-party `muid` cookie.

use std::fmt;

/// Name of the first-party cookie.
pub const COOKIE_NAME: &str = "muid";

/// Cookie lifetime, also used as the cache TTL.
pub const ONE_YEAR_SECONDS: u64 = 31_536_000;

/// A `Set-Cookie` value for the first-party id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstPartyCookie {
    pub value: String,
    pub domain: String,
}

impl FirstPartyCookie {
    pub fn new(value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for FirstPartyCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}; Path=/; Domain={}; Max-Age={}; HttpOnly; Secure; SameSite=None",
            COOKIE_NAME, self.value, self.domain, ONE_YEAR_SECONDS
        )
    }
}

/// Finds the `muid` value in a `Cookie` request header.
pub fn parse_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
}
