//! Sync protocol behaviour across requests sharing one cache.

use std::sync::Arc;
use std::time::Duration;

use idsync_core::{IdentityCache, MokaCache, SyncEngine, SyncRequest, SyncResponse, SyncState};

const TEMPLATE: &str = "https%3A%2F%2Fx%2F%3Fuid%3D%24%7BDEVICE_ID%7D%26hem%3D%24%7BEHASH_SHA256_LOWERCASE%7D";

fn engine() -> SyncEngine<MokaCache<SyncState>> {
    SyncEngine::new(Arc::new(MokaCache::new(1_000)), "a.osintami.com")
}

fn partner_request(cookie_id: Option<&str>, email_hash: &str) -> SyncRequest {
    SyncRequest {
        partner_cookie_id: "xyz456".to_string(),
        partner_id: "pdq123".to_string(),
        email_hash: email_hash.to_string(),
        redirect: TEMPLATE.to_string(),
        client_ip: "220.120.12.13".to_string(),
        user_agent: "test-user-agent".to_string(),
        cookie_id: cookie_id.map(str::to_string),
    }
}

#[test]
fn test_email_hash_is_recovered_from_cache() {
    let engine = engine();

    let first = engine.sync(partner_request(None, "abc123")).unwrap();
    let id = first.cookie.value.clone();
    assert_eq!(
        first.response,
        SyncResponse::Redirect(format!("https://x/?uid={}&hem=abc123", id))
    );

    let second = engine.sync(partner_request(Some(&id), "")).unwrap();
    assert_eq!(second.cookie.value, id);
    assert_eq!(
        second.response,
        SyncResponse::Redirect(format!("https://x/?uid={}&hem=abc123", id))
    );
}

#[test]
fn test_unknown_hash_renders_empty() {
    let outcome = engine()
        .sync(partner_request(Some("abc"), ""))
        .unwrap();
    assert_eq!(
        outcome.response,
        SyncResponse::Redirect("https://x/?uid=abc&hem=".to_string())
    );
}

#[test]
fn test_state_is_written_under_first_party_id() {
    let engine = engine();
    let outcome = engine.sync(partner_request(Some("muid-9"), "h")).unwrap();

    let cached = engine.cache().get("muid-9").expect("state cached");
    assert_eq!(cached, outcome.state);
    assert_eq!(cached.partner_id, "pdq123");
    assert_eq!(cached.partner_cookie_id, "xyz456");
    assert_eq!(cached.client_ip, "220.120.12.13");
    assert_eq!(cached.redirect_url, TEMPLATE);
}

#[test]
fn test_new_hash_replaces_cached_hash() {
    let engine = engine();
    engine.sync(partner_request(Some("muid-9"), "old")).unwrap();
    engine.sync(partner_request(Some("muid-9"), "new")).unwrap();

    let cached = engine.cache().get("muid-9").unwrap();
    assert_eq!(cached.partner_email_hash, "new");
}

#[test]
fn test_fresh_ids_differ() {
    let engine = engine();
    let a = engine.sync(SyncRequest::default()).unwrap();
    let b = engine.sync(SyncRequest::default()).unwrap();
    assert_ne!(a.cookie.value, b.cookie.value);
    assert_eq!(a.response, SyncResponse::NoContent);
}

#[test]
fn test_engine_accepts_any_cache() {
    struct Forgetful;

    impl IdentityCache<SyncState> for Forgetful {
        fn get(&self, _key: &str) -> Option<SyncState> {
            None
        }

        fn set(&self, _key: &str, _value: SyncState, ttl: Duration) {
            assert_eq!(ttl, Duration::from_secs(31_536_000));
        }
    }

    let engine = SyncEngine::new(Arc::new(Forgetful), "example.com");
    let outcome = engine.sync(partner_request(Some("abc"), "")).unwrap();
    assert_eq!(outcome.state.partner_email_hash, "");
    assert!(outcome.cookie.to_string().contains("Domain=example.com"));
}
