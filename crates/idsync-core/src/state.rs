//! Sync state remembered per first-party id.

use idsync_graph::{CollapseSignal, Partner};
use serde::{Deserialize, Serialize};

/// Everything observed in one sync, keyed in the cache by `my_cookie_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// First-party id (inbound `muid` cookie or freshly minted).
    pub my_cookie_id: String,
    /// `pcid` query parameter.
    pub partner_cookie_id: String,
    /// `pid` query parameter.
    pub partner_id: String,
    /// `hem` query parameter, or the last one seen for this id.
    pub partner_email_hash: String,
    /// `r` query parameter, as received.
    pub redirect_url: String,
    pub user_agent: String,
    pub client_ip: String,
}

impl SyncState {
    /// Graph signals for consolidation. The partner edge is only asserted when
    /// the partner sent both of its ids.
    pub fn collapse_signal(&self) -> CollapseSignal {
        let partner = (!self.partner_id.is_empty() && !self.partner_cookie_id.is_empty())
            .then(|| Partner::new(&self.partner_id, &self.partner_cookie_id));

        CollapseSignal {
            cookie_id: self.my_cookie_id.clone(),
            partner,
            user_agent: self.user_agent.clone(),
            addr: self.client_ip.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_signal_with_partner() {
        let state = SyncState {
            my_cookie_id: "muid-1".to_string(),
            partner_cookie_id: "xyz456".to_string(),
            partner_id: "pdq123".to_string(),
            user_agent: "test-user-agent".to_string(),
            client_ip: "220.120.12.13".to_string(),
            ..Default::default()
        };

        let signal = state.collapse_signal();
        assert_eq!(signal.cookie_id, "muid-1");
        assert_eq!(signal.addr, "220.120.12.13");
        let partner = signal.partner.unwrap();
        assert_eq!(partner.partner_id, "pdq123");
        assert_eq!(partner.cookie_id, "xyz456");
    }

    #[test]
    fn test_collapse_signal_without_partner_cookie() {
        let state = SyncState {
            my_cookie_id: "muid-1".to_string(),
            partner_id: "pdq123".to_string(),
            ..Default::default()
        };
        assert!(state.collapse_signal().partner.is_none());
    }
}
