//! Identity consolidation ("collapse").
//!
//! Policy:
//!
//! - A cookie already stored under the first-party id is merged in place: the
//!   partner edge is appended unless an identical (pid, pcookie) edge exists,
//!   and the device fingerprint is linked (or its counter bumped).
//! - Otherwise a new cookie is minted under the id. A browser already stored
//!   with the same fingerprint is re-attached to it, carrying its history
//!   forward; if none exists a fresh browser is created.
//! - Non-human traffic is never consolidated.
//!
//! All reads and writes for one signal share a single transaction. Two
//! collapses racing on the same fingerprint can still both create nodes; the
//! read path reports that as [`GraphError::DuplicateData`].

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::{GraphError, GraphResult};
use crate::model::{Browser, Cookie, Partner};
use crate::store::GraphStore;
use crate::txn::{Txn, TxnScope};

/// User agents treated as automated traffic by default.
pub const DEFAULT_BOT_PATTERN: &str = r"(?i)bot|crawler|spider|curl|wget|headless";

/// Identity signals observed in one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseSignal {
    /// First-party id; the cookie label.
    pub cookie_id: String,
    /// Partner assertion, when the partner identified itself.
    pub partner: Option<Partner>,
    pub user_agent: String,
    pub addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingCookieId,
    MissingUserAgent,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollapseOutcome {
    /// New cookie with a new browser.
    Created(Cookie),
    /// New cookie re-using a browser stored under another identity.
    Relinked { cookie: Cookie, browser_uid: String },
    /// Existing cookie updated in place.
    Merged(Cookie),
    Skipped(SkipReason),
}

/// Runs the collapse policy against a [`GraphStore`].
#[derive(Debug, Clone)]
pub struct Collapser {
    store: GraphStore,
    bot_pattern: Regex,
}

impl Collapser {
    pub fn new(store: GraphStore) -> Self {
        Self {
            store,
            bot_pattern: default_bot_pattern(),
        }
    }

    pub fn with_bot_pattern(mut self, pattern: Regex) -> Self {
        self.bot_pattern = pattern;
        self
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Consolidate one signal. Commits on success, discards on any error.
    pub async fn consolidate(&self, signal: &CollapseSignal) -> GraphResult<CollapseOutcome> {
        if let Some(reason) = self.skip_reason(signal) {
            debug!(component = "collapse", reason = ?reason, user_agent = %signal.user_agent, "skipped");
            return Ok(CollapseOutcome::Skipped(reason));
        }

        let mut txn = self.store.new_txn();
        match self.consolidate_in(&mut txn, signal).await {
            Ok(outcome) => {
                self.store.commit(&mut txn).await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(discard_err) = self.store.discard(&mut txn).await {
                    warn!(component = "collapse", error = %discard_err, "discard failed");
                }
                Err(e)
            }
        }
    }

    fn skip_reason(&self, signal: &CollapseSignal) -> Option<SkipReason> {
        if signal.cookie_id.is_empty() {
            Some(SkipReason::MissingCookieId)
        } else if signal.user_agent.trim().is_empty() {
            Some(SkipReason::MissingUserAgent)
        } else if self.bot_pattern.is_match(&signal.user_agent) {
            Some(SkipReason::Bot)
        } else {
            None
        }
    }

    async fn consolidate_in(
        &self,
        txn: &mut Txn,
        signal: &CollapseSignal,
    ) -> GraphResult<CollapseOutcome> {
        match self
            .store
            .find_cookie(&signal.cookie_id, TxnScope::Caller(&mut *txn))
            .await
        {
            Ok(existing) => self.merge(txn, existing, signal).await,
            Err(e) if e.is_not_found() => self.relink_or_create(txn, signal).await,
            Err(e) => {
                if let GraphError::DuplicateData { count, .. } = &e {
                    error!(
                        component = "collapse",
                        cookie_id = %signal.cookie_id,
                        count,
                        "refusing to consolidate duplicate cookies"
                    );
                }
                Err(e)
            }
        }
    }

    async fn merge(
        &self,
        txn: &mut Txn,
        existing: Cookie,
        signal: &CollapseSignal,
    ) -> GraphResult<CollapseOutcome> {
        let partners: Vec<Partner> = signal
            .partner
            .iter()
            .filter(|p| !existing.has_partner(p))
            .cloned()
            .collect();

        let mut browsers = Vec::new();
        match existing.browser_for(&signal.user_agent, &signal.addr) {
            Some(attached) => {
                self.store
                    .bump_browser(attached, TxnScope::Caller(&mut *txn), false)
                    .await?;
            }
            None => browsers.push(self.fingerprint_browser(txn, signal).await?),
        }

        let cookie = self
            .store
            .attach_to_cookie(
                &existing.uid,
                browsers,
                partners,
                TxnScope::Caller(&mut *txn),
                false,
            )
            .await?;
        info!(component = "collapse", cookie_id = %cookie.cookie_id, "merged");
        Ok(CollapseOutcome::Merged(cookie))
    }

    async fn relink_or_create(
        &self,
        txn: &mut Txn,
        signal: &CollapseSignal,
    ) -> GraphResult<CollapseOutcome> {
        let browser = self.fingerprint_browser(txn, signal).await?;
        let relinked_uid = browser.is_persisted().then(|| browser.uid.clone());

        let mut cookie = Cookie::new(&signal.cookie_id).with_browser(browser);
        if let Some(partner) = &signal.partner {
            cookie = cookie.with_partner(partner.clone());
        }
        let cookie = self
            .store
            .create_cookie(cookie, TxnScope::Caller(&mut *txn), false)
            .await?;

        match relinked_uid {
            Some(browser_uid) => {
                info!(component = "collapse", cookie_id = %cookie.cookie_id, browser_uid = %browser_uid, "relinked");
                Ok(CollapseOutcome::Relinked {
                    cookie,
                    browser_uid,
                })
            }
            None => {
                info!(component = "collapse", cookie_id = %cookie.cookie_id, "created");
                Ok(CollapseOutcome::Created(cookie))
            }
        }
    }

    /// The stored browser for this fingerprint with its counter bumped, or a new one.
    async fn fingerprint_browser(
        &self,
        txn: &mut Txn,
        signal: &CollapseSignal,
    ) -> GraphResult<Browser> {
        match self
            .store
            .find_browser(&signal.user_agent, &signal.addr, TxnScope::Caller(&mut *txn))
            .await
        {
            Ok(mut browser) => {
                browser.count += 1;
                Ok(browser)
            }
            Err(e) if e.is_not_found() => Ok(Browser::new(&signal.user_agent, &signal.addr)),
            Err(e) => Err(e),
        }
    }
}

fn default_bot_pattern() -> Regex {
    Regex::new(DEFAULT_BOT_PATTERN).expect("default bot pattern is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;

    fn collapser() -> Collapser {
        Collapser::new(GraphStore::from_config(GraphConfig::default()).unwrap())
    }

    fn signal(user_agent: &str) -> CollapseSignal {
        CollapseSignal {
            cookie_id: "abc".to_string(),
            partner: None,
            user_agent: user_agent.to_string(),
            addr: "220.120.12.13".to_string(),
        }
    }

    #[test]
    fn test_default_bot_pattern() {
        let c = collapser();
        assert_eq!(c.skip_reason(&signal("Googlebot/2.1")), Some(SkipReason::Bot));
        assert_eq!(c.skip_reason(&signal("curl/8.4.0")), Some(SkipReason::Bot));
        assert_eq!(
            c.skip_reason(&signal("Mozilla/5.0 HeadlessChrome/120.0")),
            Some(SkipReason::Bot)
        );
        assert_eq!(c.skip_reason(&signal("Mozilla/5.0 (X11; Linux x86_64)")), None);
    }

    #[test]
    fn test_skip_missing_fields() {
        let c = collapser();
        assert_eq!(c.skip_reason(&signal("  ")), Some(SkipReason::MissingUserAgent));

        let mut s = signal("Mozilla/5.0");
        s.cookie_id.clear();
        assert_eq!(c.skip_reason(&s), Some(SkipReason::MissingCookieId));
    }

    #[test]
    fn test_custom_bot_pattern() {
        let c = collapser().with_bot_pattern(Regex::new("^test-").unwrap());
        assert_eq!(c.skip_reason(&signal("test-user-agent")), Some(SkipReason::Bot));
        assert_eq!(c.skip_reason(&signal("Googlebot/2.1")), None);
    }
}
