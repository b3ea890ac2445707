//! Transaction handles and scoping.

use crate::client::TxnContext;
use crate::error::{GraphError, GraphResult};

/// A caller-managed transaction.
///
/// The start timestamp is adopted from the first response, so reads and writes
/// issued through the same `Txn` share one snapshot. Finish it with
/// [`GraphStore::commit`](crate::GraphStore::commit) or
/// [`GraphStore::discard`](crate::GraphStore::discard).
#[derive(Debug, Default)]
pub struct Txn {
    start_ts: Option<u64>,
    keys: Vec<String>,
    preds: Vec<String>,
    finished: bool,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_ts(&self) -> Option<u64> {
        self.start_ts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether any mutation has been staged in this transaction.
    pub fn has_writes(&self) -> bool {
        !self.keys.is_empty() || !self.preds.is_empty()
    }

    pub(crate) fn keys(&self) -> &[String] {
        &self.keys
    }

    pub(crate) fn preds(&self) -> &[String] {
        &self.preds
    }

    pub(crate) fn ensure_open(&self) -> GraphResult<()> {
        if self.finished {
            return Err(GraphError::transport("transaction already finished"));
        }
        Ok(())
    }

    /// Fold a response's txn context into this handle.
    pub(crate) fn absorb(&mut self, ctx: &TxnContext) -> GraphResult<()> {
        if ctx.aborted {
            self.finished = true;
            return Err(GraphError::transport("transaction aborted by backend"));
        }
        match self.start_ts {
            None if ctx.start_ts != 0 => self.start_ts = Some(ctx.start_ts),
            Some(ts) if ctx.start_ts != 0 && ctx.start_ts != ts => {
                return Err(GraphError::transport(format!(
                    "start timestamp mismatch: expected {}, got {}",
                    ts, ctx.start_ts
                )));
            }
            _ => {}
        }
        merge_unique(&mut self.keys, &ctx.keys);
        merge_unique(&mut self.preds, &ctx.preds);
        Ok(())
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }
}

fn merge_unique(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

/// Who owns commit/discard for a store operation.
#[derive(Debug)]
pub enum TxnScope<'a> {
    /// The store runs the operation in its own transaction and completes it.
    Owned,
    /// The caller's transaction; the caller commits or discards.
    Caller(&'a mut Txn),
}

impl<'a> TxnScope<'a> {
    pub(crate) fn into_txn(self) -> Option<&'a mut Txn> {
        match self {
            Self::Owned => None,
            Self::Caller(txn) => Some(txn),
        }
    }
}

impl<'a> From<&'a mut Txn> for TxnScope<'a> {
    fn from(txn: &'a mut Txn) -> Self {
        Self::Caller(txn)
    }
}
