//! The `/csr` sync route.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::{COOKIE, HOST, LOCATION, SET_COOKIE, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use idsync_core::{
    parse_cookie_header, IdentityCache, SyncEngine, SyncOutcome, SyncRequest, SyncResponse,
    SyncState,
};
use tracing::{error, warn};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Query parameters of a partner sync.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CsrQuery {
    pub pcid: String,
    pub pid: String,
    pub hem: String,
    pub r: String,
}

impl CsrQuery {
    /// Picks the first occurrence of each known key; repeats and unknown keys
    /// are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        let mut seen = [false; 4];
        for (key, value) in pairs {
            let (slot, field) = match key.as_str() {
                "pcid" => (0, &mut query.pcid),
                "pid" => (1, &mut query.pid),
                "hem" => (2, &mut query.hem),
                "r" => (3, &mut query.r),
                _ => continue,
            };
            if !seen[slot] {
                seen[slot] = true;
                *field = value;
            }
        }
        query
    }
}

struct AppState<C> {
    engine: Arc<SyncEngine<C>>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

/// Route path under `prefix`; an empty or `/` prefix mounts at `/csr`.
pub fn csr_path(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        "/csr".to_string()
    } else {
        format!("/{prefix}/csr")
    }
}

pub fn router<C>(engine: Arc<SyncEngine<C>>, path_prefix: &str) -> Router
where
    C: IdentityCache<SyncState> + 'static,
{
    Router::new()
        .route(&csr_path(path_prefix), get(csr::<C>))
        .with_state(AppState { engine })
}

async fn csr<C>(
    State(state): State<AppState<C>>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response
where
    C: IdentityCache<SyncState> + 'static,
{
    let query = CsrQuery::from_pairs(pairs);
    let request = SyncRequest {
        partner_cookie_id: query.pcid,
        partner_id: query.pid,
        email_hash: query.hem,
        redirect: query.r,
        client_ip: client_ip(&headers),
        user_agent: header_str(&headers, USER_AGENT).to_string(),
        cookie_id: inbound_cookie(&headers),
    };

    match state.engine.sync(request) {
        Ok(outcome) => respond(outcome),
        Err(e) => {
            error!(component = "http", error = %e, "sync failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn respond(outcome: SyncOutcome) -> Response {
    let cookie = match HeaderValue::from_str(&outcome.cookie.to_string()) {
        Ok(value) => value,
        Err(e) => {
            error!(
                component = "http",
                cookie_id = %outcome.cookie.value,
                error = %e,
                "cookie is not a valid header value"
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match outcome.response {
        SyncResponse::Redirect(url) => match HeaderValue::from_str(&url) {
            Ok(location) => (
                StatusCode::FOUND,
                [(SET_COOKIE, cookie), (LOCATION, location)],
            )
                .into_response(),
            Err(_) => {
                warn!(component = "http", redirect = %url, "redirect is not a valid header value");
                (StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response()
            }
        },
        SyncResponse::NoContent => (StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response(),
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// `X-Forwarded-For` as sent, falling back to `Host`.
fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, HeaderName::from_static(X_FORWARDED_FOR));
    if forwarded.is_empty() {
        header_str(headers, HOST).to_string()
    } else {
        forwarded.to_string()
    }
}

fn inbound_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(parse_cookie_header)
        .map(str::to_string)
}
