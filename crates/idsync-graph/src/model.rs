//! Node documents exchanged with the graph backend.
//!
//! Field names on the wire match the persisted schema 1:1 (see
//! [`crate::schema::SCHEMA`]); Rust names follow the domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blank-node label the backend reports the new cookie's uid under.
pub(crate) const COOKIE_BLANK: &str = "cookie";
/// Blank-node label for a standalone browser insert.
pub(crate) const BROWSER_BLANK: &str = "browser";

pub const COOKIE_TYPE: &str = "Cookie";
pub const BROWSER_TYPE: &str = "Browser";
pub const PARTNER_TYPE: &str = "Partner";

/// First-party identity node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Graph-assigned id (`0x..`), or a blank node (`_:..`) before insert.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// First-party identifier handed to partners.
    #[serde(rename = "cookie", default, skip_serializing_if = "String::is_empty")]
    pub cookie_id: String,

    /// Set once when the cookie is created.
    #[serde(rename = "issued", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(rename = "Browser", default, skip_serializing_if = "Vec::is_empty")]
    pub browsers: Vec<Browser>,

    #[serde(rename = "Partner", default, skip_serializing_if = "Vec::is_empty")]
    pub partners: Vec<Partner>,

    #[serde(rename = "dgraph.type", default, skip_serializing_if = "Vec::is_empty")]
    pub node_type: Vec<String>,
}

/// Device fingerprint node. Looked up by (user agent, address).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Browser {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(default)]
    pub addr: String,

    #[serde(rename = "useragent", default)]
    pub user_agent: String,

    /// How many times this fingerprint has been observed.
    #[serde(default)]
    pub count: i64,

    #[serde(rename = "dgraph.type", default, skip_serializing_if = "Vec::is_empty")]
    pub node_type: Vec<String>,
}

/// A partner's own identifier for the same browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(rename = "pid", default)]
    pub partner_id: String,

    /// Partner-side cookie id; not the same namespace as [`Cookie::cookie_id`].
    #[serde(rename = "pcookie", default)]
    pub cookie_id: String,

    #[serde(rename = "dgraph.type", default, skip_serializing_if = "Vec::is_empty")]
    pub node_type: Vec<String>,
}

impl Cookie {
    pub fn new(cookie_id: impl Into<String>) -> Self {
        Self {
            cookie_id: cookie_id.into(),
            ..Default::default()
        }
    }

    pub fn with_browser(mut self, browser: Browser) -> Self {
        self.browsers.push(browser);
        self
    }

    pub fn with_partner(mut self, partner: Partner) -> Self {
        self.partners.push(partner);
        self
    }

    /// Whether the cookie has been materialized by the backend.
    pub fn is_persisted(&self) -> bool {
        is_assigned_uid(&self.uid)
    }

    /// Label new nodes with blank ids and node types ahead of a `set` mutation.
    ///
    /// Children that already carry a graph uid are left alone, which links the
    /// existing node instead of creating a new one.
    pub(crate) fn prepare_insert(&mut self) {
        if self.uid.is_empty() {
            self.uid = blank(COOKIE_BLANK);
        }
        set_type(&mut self.node_type, COOKIE_TYPE);
        prepare_children(&mut self.browsers, &mut self.partners);
    }

    /// The edge to a browser with this fingerprint, if one is attached.
    pub fn browser_for(&self, user_agent: &str, addr: &str) -> Option<&Browser> {
        self.browsers.iter().find(|b| b.matches(user_agent, addr))
    }

    /// Whether an equivalent partner edge is already attached.
    pub fn has_partner(&self, partner: &Partner) -> bool {
        self.partners.iter().any(|p| p.same_edge(partner))
    }
}

impl Browser {
    pub fn new(user_agent: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            addr: addr.into(),
            count: 1,
            ..Default::default()
        }
    }

    pub fn matches(&self, user_agent: &str, addr: &str) -> bool {
        self.user_agent == user_agent && self.addr == addr
    }

    pub fn is_persisted(&self) -> bool {
        is_assigned_uid(&self.uid)
    }

    pub(crate) fn prepare_insert(&mut self, label: &str) {
        if self.uid.is_empty() {
            self.uid = blank(label);
        }
        set_type(&mut self.node_type, BROWSER_TYPE);
    }
}

impl Partner {
    pub fn new(partner_id: impl Into<String>, cookie_id: impl Into<String>) -> Self {
        Self {
            partner_id: partner_id.into(),
            cookie_id: cookie_id.into(),
            ..Default::default()
        }
    }

    /// Two edges are the same assertion when both ids match.
    pub fn same_edge(&self, other: &Partner) -> bool {
        self.partner_id == other.partner_id && self.cookie_id == other.cookie_id
    }

    pub(crate) fn prepare_insert(&mut self, label: &str) {
        if self.uid.is_empty() {
            self.uid = blank(label);
        }
        set_type(&mut self.node_type, PARTNER_TYPE);
    }
}

/// Blank-node labels are indexed so sibling inserts never collapse into one node.
pub(crate) fn prepare_children(browsers: &mut [Browser], partners: &mut [Partner]) {
    for (i, browser) in browsers.iter_mut().enumerate() {
        browser.prepare_insert(&format!("{BROWSER_BLANK}{i}"));
    }
    for (i, partner) in partners.iter_mut().enumerate() {
        partner.prepare_insert(&format!("partner{i}"));
    }
}

pub(crate) fn blank(label: &str) -> String {
    format!("_:{label}")
}

pub(crate) fn is_assigned_uid(uid: &str) -> bool {
    !uid.is_empty() && !uid.starts_with("_:")
}

fn set_type(node_type: &mut Vec<String>, name: &str) {
    if node_type.is_empty() {
        node_type.push(name.to_string());
    }
}

/// `{"all": [...]}` query payload.
#[derive(Debug, Deserialize)]
pub(crate) struct AllResponse<T> {
    #[serde(default = "Vec::new")]
    pub all: Vec<T>,
}
