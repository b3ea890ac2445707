//! The cookie sync protocol.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::IdentityCache;
use crate::cookie::{FirstPartyCookie, ONE_YEAR_SECONDS};
use crate::error::SyncResult;
use crate::redirect;
use crate::state::SyncState;
use crate::worker::ConsolidationQueue;

/// Signals from one partner sync request. Empty strings mean absent.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Partner's id for this browser (`pcid`).
    pub partner_cookie_id: String,
    /// Partner identifier (`pid`).
    pub partner_id: String,
    /// Lowercase SHA-256 email hash (`hem`).
    pub email_hash: String,
    /// URL-encoded redirect template (`r`).
    pub redirect: String,
    pub client_ip: String,
    pub user_agent: String,
    /// Inbound `muid` cookie.
    pub cookie_id: Option<String>,
}

/// How the sync response should answer the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResponse {
    /// 302 to the rendered partner URL.
    Redirect(String),
    /// 204.
    NoContent,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Always set on the response.
    pub cookie: FirstPartyCookie,
    pub response: SyncResponse,
    /// The state written to the cache.
    pub state: SyncState,
}

/// Resolves the first-party id, remembers the sync state and renders the
/// partner redirect.
pub struct SyncEngine<C> {
    cache: Arc<C>,
    cookie_domain: String,
    queue: Option<ConsolidationQueue>,
}

impl<C> SyncEngine<C>
where
    C: IdentityCache<SyncState>,
{
    pub fn new(cache: Arc<C>, cookie_domain: impl Into<String>) -> Self {
        Self {
            cache,
            cookie_domain: cookie_domain.into(),
            queue: None,
        }
    }

    /// Hands every sync state to a consolidation worker.
    pub fn with_queue(mut self, queue: ConsolidationQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    pub fn cookie_domain(&self) -> &str {
        &self.cookie_domain
    }

    pub fn sync(&self, request: SyncRequest) -> SyncResult<SyncOutcome> {
        let started = Instant::now();

        let cookie_id = request
            .cookie_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let cookie = FirstPartyCookie::new(&cookie_id, &self.cookie_domain);

        let mut email_hash = request.email_hash;
        if email_hash.is_empty() {
            if let Some(previous) = self.cache.get(&cookie_id) {
                email_hash = previous.partner_email_hash;
            }
        }

        let state = SyncState {
            my_cookie_id: cookie_id.clone(),
            partner_cookie_id: request.partner_cookie_id,
            partner_id: request.partner_id,
            partner_email_hash: email_hash,
            redirect_url: request.redirect,
            user_agent: request.user_agent,
            client_ip: request.client_ip,
        };
        self.cache.set(
            &cookie_id,
            state.clone(),
            Duration::from_secs(ONE_YEAR_SECONDS),
        );

        if let Some(queue) = &self.queue {
            if let Err(e) = queue.enqueue(state.clone()) {
                warn!(
                    component = "sync",
                    cookie_id = %cookie_id,
                    error = %e,
                    "sync state not queued for consolidation"
                );
            }
        }

        let response = if state.redirect_url.is_empty() {
            SyncResponse::NoContent
        } else {
            match redirect::render(&state.redirect_url, &cookie_id, &state.partner_email_hash) {
                Ok(url) => SyncResponse::Redirect(url),
                Err(e) => {
                    warn!(
                        component = "sync",
                        cookie_id = %cookie_id,
                        error = %e,
                        "undecodable redirect template"
                    );
                    SyncResponse::NoContent
                }
            }
        };

        let redirect = match &response {
            SyncResponse::Redirect(url) => url.as_str(),
            SyncResponse::NoContent => "",
        };
        debug!(
            component = "sync",
            cookie_id = %cookie_id,
            client = %state.client_ip,
            redirect,
            elapsed_us = started.elapsed().as_micros() as u64,
            "sync complete"
        );

        Ok(SyncOutcome {
            cookie,
            response,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaCache;

    fn engine() -> SyncEngine<MokaCache<SyncState>> {
        SyncEngine::new(Arc::new(MokaCache::new(64)), "a.osintami.com")
    }

    #[test]
    fn test_inbound_cookie_is_kept() {
        let outcome = engine()
            .sync(SyncRequest {
                cookie_id: Some("muid-1".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.cookie.value, "muid-1");
        assert_eq!(outcome.cookie.domain, "a.osintami.com");
        assert_eq!(outcome.response, SyncResponse::NoContent);
    }

    #[test]
    fn test_fresh_cookie_is_a_uuid() {
        let outcome = engine()
            .sync(SyncRequest {
                cookie_id: Some(String::new()),
                ..Default::default()
            })
            .unwrap();
        assert!(Uuid::parse_str(&outcome.cookie.value).is_ok());
    }

    #[test]
    fn test_bad_template_is_no_content() {
        let outcome = engine()
            .sync(SyncRequest {
                redirect: "%zz".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.response, SyncResponse::NoContent);
        assert_eq!(outcome.state.redirect_url, "%zz");
    }
}
