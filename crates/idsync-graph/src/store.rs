//! Identity graph store: find, create and delete Cookie/Browser nodes.
//!
//! Every operation takes a [`TxnScope`]. With [`TxnScope::Owned`] the store
//! runs a single-operation transaction and commits it (mutations are sent with
//! `commitNow`). With [`TxnScope::Caller`] the caller's transaction is used
//! and left open unless `commit_now` is set.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::client::{DgraphClient, MutationData, MutationKind};
use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::model::{
    is_assigned_uid, prepare_children, AllResponse, Browser, Cookie, Partner, BROWSER_BLANK,
    COOKIE_BLANK,
};
use crate::txn::{Txn, TxnScope};

const COOKIE_FIELDS: &str = r#"
        uid
        cookie
        issued
        dgraph.type
        Browser {
            uid
            addr
            useragent
            count
            dgraph.type
        }
        Partner {
            uid
            pid
            pcookie
            dgraph.type
        }"#;

const BROWSER_FIELDS: &str = r#"
        uid
        addr
        useragent
        count
        dgraph.type"#;

/// Handle to the identity graph. Cheap to clone; clones share one client.
#[derive(Debug, Clone)]
pub struct GraphStore {
    client: DgraphClient,
}

impl GraphStore {
    pub fn new(client: DgraphClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: GraphConfig) -> GraphResult<Self> {
        DgraphClient::new(config).map(Self::new)
    }

    pub fn client(&self) -> &DgraphClient {
        &self.client
    }

    /// Open a caller-managed transaction. Nothing is sent until first use.
    pub fn new_txn(&self) -> Txn {
        Txn::new()
    }

    /// Commit a caller-managed transaction.
    pub async fn commit(&self, txn: &mut Txn) -> GraphResult<()> {
        txn.ensure_open()?;
        txn.finish();
        match txn.start_ts() {
            Some(ts) if txn.has_writes() => self.client.commit(ts, txn.keys(), txn.preds()).await,
            // read-only or untouched: nothing to make durable
            _ => Ok(()),
        }
    }

    /// Discard a caller-managed transaction. Discarding twice is a no-op.
    pub async fn discard(&self, txn: &mut Txn) -> GraphResult<()> {
        if txn.is_finished() {
            return Ok(());
        }
        txn.finish();
        match txn.start_ts() {
            Some(ts) => self.client.abort(ts).await,
            None => Ok(()),
        }
    }

    /// Create a cookie with its nested browser and partner documents.
    ///
    /// `IssuedAt` is stamped here. The returned cookie is re-read from the
    /// backend so every child carries its assigned uid.
    pub async fn create_cookie(
        &self,
        mut cookie: Cookie,
        scope: TxnScope<'_>,
        commit_now: bool,
    ) -> GraphResult<Cookie> {
        if cookie.cookie_id.is_empty() {
            return Err(GraphError::InvalidInput {
                message: "cookie id is empty".to_string(),
            });
        }
        cookie.issued_at = Some(Utc::now());
        cookie.prepare_insert();

        let mut txn = scope.into_txn();
        let document = to_document(&cookie)?;
        let data = self
            .mutate(txn.as_deref_mut(), MutationKind::Set, &document, commit_now)
            .await
            .inspect_err(|e| {
                error!(component = "dgraph", command = "create", error = %e, "mutate cookie")
            })?;

        let uid = assigned_uid(&data, &cookie.uid, COOKIE_BLANK)?;
        debug!(component = "dgraph", uid = %uid, cookie_id = %cookie.cookie_id, "created cookie");
        self.find_cookie_by_uid(&uid, read_scope(txn)).await
    }

    /// Create a standalone browser node.
    pub async fn create_browser(
        &self,
        mut browser: Browser,
        scope: TxnScope<'_>,
        commit_now: bool,
    ) -> GraphResult<Browser> {
        if browser.user_agent.is_empty() && browser.addr.is_empty() {
            return Err(GraphError::InvalidInput {
                message: "browser has neither user agent nor address".to_string(),
            });
        }
        browser.prepare_insert(BROWSER_BLANK);

        let mut txn = scope.into_txn();
        let document = to_document(&browser)?;
        let data = self
            .mutate(txn.as_deref_mut(), MutationKind::Set, &document, commit_now)
            .await
            .inspect_err(|e| {
                error!(component = "dgraph", command = "create", error = %e, "mutate browser")
            })?;

        let uid = assigned_uid(&data, &browser.uid, BROWSER_BLANK)?;
        self.find_browser_by_uid(&uid, read_scope(txn)).await
    }

    /// Delete a cookie by document.
    ///
    /// The cookie must be fully materialized (uids included); the delete
    /// targets the same document shape used for creation.
    pub async fn delete_cookie(
        &self,
        cookie: &Cookie,
        scope: TxnScope<'_>,
        commit_now: bool,
    ) -> GraphResult<()> {
        if !cookie.is_persisted() {
            return Err(GraphError::InvalidInput {
                message: format!("cookie {:?} has no assigned uid", cookie.cookie_id),
            });
        }

        let mut txn = scope.into_txn();
        let document = to_document(cookie)?;
        self.mutate(txn.as_deref_mut(), MutationKind::Delete, &document, commit_now)
            .await
            .inspect_err(|e| {
                error!(component = "dgraph", command = "delete", error = %e, "mutate cookie")
            })?;
        debug!(component = "dgraph", uid = %cookie.uid, "deleted cookie");
        Ok(())
    }

    /// Append browser and partner edges to an existing cookie.
    ///
    /// Browsers with a uid are linked as-is (their fields are rewritten with the
    /// values passed in); the rest are created.
    pub async fn attach_to_cookie(
        &self,
        cookie_uid: &str,
        mut browsers: Vec<Browser>,
        mut partners: Vec<Partner>,
        scope: TxnScope<'_>,
        commit_now: bool,
    ) -> GraphResult<Cookie> {
        if !is_assigned_uid(cookie_uid) {
            return Err(GraphError::InvalidInput {
                message: format!("cannot attach to unassigned uid {:?}", cookie_uid),
            });
        }

        let mut txn = scope.into_txn();
        if !browsers.is_empty() || !partners.is_empty() {
            prepare_children(&mut browsers, &mut partners);
            let document = json!({
                "uid": cookie_uid,
                "Browser": browsers,
                "Partner": partners,
            });
            self.mutate(txn.as_deref_mut(), MutationKind::Set, &document, commit_now)
                .await?;
        }
        self.find_cookie_by_uid(cookie_uid, read_scope(txn)).await
    }

    /// Increment a browser's occurrence counter.
    pub async fn bump_browser(
        &self,
        browser: &Browser,
        scope: TxnScope<'_>,
        commit_now: bool,
    ) -> GraphResult<Browser> {
        if !browser.is_persisted() {
            return Err(GraphError::InvalidInput {
                message: "browser has no assigned uid".to_string(),
            });
        }

        let mut txn = scope.into_txn();
        let document = json!({ "uid": browser.uid, "count": browser.count + 1 });
        self.mutate(txn.as_deref_mut(), MutationKind::Set, &document, commit_now)
            .await?;
        self.find_browser_by_uid(&browser.uid, read_scope(txn)).await
    }

    /// Exact match on the first-party id.
    ///
    /// More than one match is an integrity violation: the first match comes
    /// back inside [`GraphError::DuplicateData`].
    pub async fn find_cookie(&self, cookie_id: &str, scope: TxnScope<'_>) -> GraphResult<Cookie> {
        let query = format!(
            "query cookie_by_id($cookie: string) {{\n    all(func: eq(cookie, $cookie)) {{{}\n    }}\n}}",
            COOKIE_FIELDS
        );
        let mut all: Vec<Cookie> = self
            .run_query(scope.into_txn(), &query, &[("$cookie", cookie_id)])
            .await
            .inspect_err(|e| error!(component = "dgraph", error = %e, "find cookie"))?;

        match all.len() {
            0 => Err(GraphError::not_found("cookie", cookie_id)),
            1 => Ok(all.remove(0)),
            count => {
                warn!(component = "dgraph", cookie_id, count, "duplicate cookies exist");
                Err(GraphError::DuplicateData {
                    cookie_id: cookie_id.to_string(),
                    count,
                    first: Box::new(all.remove(0)),
                })
            }
        }
    }

    pub async fn find_cookie_by_uid(&self, uid: &str, scope: TxnScope<'_>) -> GraphResult<Cookie> {
        let query = format!(
            "query cookie_by_uid($uid: string) {{\n    all(func: uid($uid)) {{{}\n    }}\n}}",
            COOKIE_FIELDS
        );
        let all: Vec<Cookie> = self
            .run_query(scope.into_txn(), &query, &[("$uid", uid)])
            .await
            .inspect_err(|e| error!(component = "dgraph", error = %e, "find cookie with uid"))?;

        // uid() echoes unknown ids back with no predicates
        all.into_iter()
            .find(|c| !c.cookie_id.is_empty())
            .ok_or_else(|| GraphError::not_found("cookie", uid))
    }

    /// Both fields must match (`eq(useragent)` filtered by `eq(addr)`).
    pub async fn find_browser(
        &self,
        user_agent: &str,
        addr: &str,
        scope: TxnScope<'_>,
    ) -> GraphResult<Browser> {
        let query = format!(
            "query browser_by_fingerprint($ua: string, $ip: string) {{\n    all(func: eq(useragent, $ua)) @filter(eq(addr, $ip)) {{{}\n    }}\n}}",
            BROWSER_FIELDS
        );
        let all: Vec<Browser> = self
            .run_query(scope.into_txn(), &query, &[("$ua", user_agent), ("$ip", addr)])
            .await
            .inspect_err(|e| error!(component = "dgraph", error = %e, "find browser"))?;

        all.into_iter()
            .next()
            .ok_or_else(|| GraphError::not_found("browser", format!("{} @ {}", user_agent, addr)))
    }

    pub async fn find_browser_by_uid(
        &self,
        uid: &str,
        scope: TxnScope<'_>,
    ) -> GraphResult<Browser> {
        let query = format!(
            "query browser_by_uid($uid: string) {{\n    all(func: uid($uid)) {{{}\n    }}\n}}",
            BROWSER_FIELDS
        );
        let all: Vec<Browser> = self
            .run_query(scope.into_txn(), &query, &[("$uid", uid)])
            .await
            .inspect_err(|e| error!(component = "dgraph", error = %e, "find browser with uid"))?;

        all.into_iter()
            .find(|b| !b.user_agent.is_empty() || !b.addr.is_empty())
            .ok_or_else(|| GraphError::not_found("browser", uid))
    }

    async fn run_query<T: DeserializeOwned>(
        &self,
        txn: Option<&mut Txn>,
        query: &str,
        vars: &[(&str, &str)],
    ) -> GraphResult<Vec<T>> {
        let response: AllResponse<T> = match txn {
            None => {
                self.client
                    .query::<AllResponse<T>>(query, vars, None)
                    .await?
                    .0
            }
            Some(txn) => {
                txn.ensure_open()?;
                let (response, ctx) = self
                    .client
                    .query::<AllResponse<T>>(query, vars, txn.start_ts())
                    .await?;
                if let Some(ctx) = ctx {
                    txn.absorb(&ctx)?;
                }
                response
            }
        };
        Ok(response.all)
    }

    async fn mutate(
        &self,
        txn: Option<&mut Txn>,
        kind: MutationKind,
        document: &Value,
        commit_now: bool,
    ) -> GraphResult<MutationData> {
        match txn {
            None => Ok(self.client.mutate(kind, document, None, true).await?.0),
            Some(txn) => {
                txn.ensure_open()?;
                let (data, ctx) = self
                    .client
                    .mutate(kind, document, txn.start_ts(), commit_now)
                    .await?;
                if let Some(ctx) = ctx {
                    txn.absorb(&ctx)?;
                }
                if commit_now {
                    txn.finish();
                }
                Ok(data)
            }
        }
    }
}

/// Re-read inside the transaction while it is open, else from a fresh snapshot.
fn read_scope(txn: Option<&mut Txn>) -> TxnScope<'_> {
    match txn {
        Some(txn) if !txn.is_finished() => TxnScope::Caller(txn),
        _ => TxnScope::Owned,
    }
}

fn to_document<T: Serialize>(node: &T) -> GraphResult<Value> {
    serde_json::to_value(node).map_err(|e| {
        error!(component = "dgraph", error = %e, "marshal");
        GraphError::from(e)
    })
}

/// Resolve the uid of the node submitted as `submitted` (blank or assigned).
fn assigned_uid(data: &MutationData, submitted: &str, label: &str) -> GraphResult<String> {
    if is_assigned_uid(submitted) {
        return Ok(submitted.to_string());
    }
    data.uids
        .get(label)
        .cloned()
        .ok_or_else(|| GraphError::decode(format!("mutation returned no uid for {}", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_assigned_uid_prefers_existing() {
        let data = MutationData {
            uids: HashMap::from([("cookie".to_string(), "0x9".to_string())]),
        };
        assert_eq!(assigned_uid(&data, "0x1", "cookie").unwrap(), "0x1");
        assert_eq!(assigned_uid(&data, "_:cookie", "cookie").unwrap(), "0x9");
        assert!(matches!(
            assigned_uid(&MutationData::default(), "_:cookie", "cookie"),
            Err(GraphError::Decode { .. })
        ));
    }

    #[test]
    fn test_read_scope_falls_back_once_finished() {
        let mut txn = Txn::new();
        assert!(matches!(read_scope(Some(&mut txn)), TxnScope::Caller(_)));
        txn.finish();
        assert!(matches!(read_scope(Some(&mut txn)), TxnScope::Owned));
        assert!(matches!(read_scope(None), TxnScope::Owned));
    }
}
