//! Background consolidation of sync states into the identity graph.

use std::sync::Arc;

use async_trait::async_trait;
use idsync_graph::{CollapseOutcome, CollapseSignal, Collapser, GraphResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::state::SyncState;

/// Folds one collapse signal into the graph.
#[async_trait]
pub trait Consolidate: Send + Sync {
    async fn consolidate(&self, signal: &CollapseSignal) -> GraphResult<CollapseOutcome>;
}

#[async_trait]
impl Consolidate for Collapser {
    async fn consolidate(&self, signal: &CollapseSignal) -> GraphResult<CollapseOutcome> {
        Collapser::consolidate(self, signal).await
    }
}

/// Sending half of the consolidation queue.
#[derive(Debug, Clone)]
pub struct ConsolidationQueue {
    tx: mpsc::Sender<SyncState>,
}

impl ConsolidationQueue {
    /// Queues `state` without waiting. Returns `false` when the queue is full
    /// and the state was dropped.
    pub fn enqueue(&self, state: SyncState) -> SyncResult<bool> {
        match self.tx.try_send(state) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(state)) => {
                warn!(
                    component = "consolidation",
                    cookie_id = %state.my_cookie_id,
                    "queue full, dropping sync state"
                );
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::ConsolidationClosed),
        }
    }
}

/// Drains the queue on a tokio task. The task ends once every
/// [`ConsolidationQueue`] handle has been dropped.
pub struct ConsolidationWorker;

impl ConsolidationWorker {
    pub fn spawn(
        consolidator: Arc<dyn Consolidate>,
        capacity: usize,
    ) -> (ConsolidationQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SyncState>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(state) = rx.recv().await {
                let signal = state.collapse_signal();
                match consolidator.consolidate(&signal).await {
                    Ok(outcome) => debug!(
                        component = "consolidation",
                        cookie_id = %signal.cookie_id,
                        outcome = ?outcome,
                        "sync state consolidated"
                    ),
                    Err(e) => warn!(
                        component = "consolidation",
                        cookie_id = %signal.cookie_id,
                        error = %e,
                        "consolidation failed"
                    ),
                }
            }
            info!(component = "consolidation", "queue closed, worker stopping");
        });

        (ConsolidationQueue { tx }, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Consolidate for Unreachable {
        async fn consolidate(&self, _signal: &CollapseSignal) -> GraphResult<CollapseOutcome> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_state() {
        let (queue, _handle) = ConsolidationWorker::spawn(Arc::new(Unreachable), 1);

        // The worker takes the first state and blocks on it forever.
        assert!(queue.enqueue(SyncState::default()).unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(queue.enqueue(SyncState::default()).unwrap());
        assert!(!queue.enqueue(SyncState::default()).unwrap());
    }

    #[tokio::test]
    async fn test_closed_queue_is_an_error() {
        let (queue, handle) = ConsolidationWorker::spawn(Arc::new(Unreachable), 1);
        handle.abort();
        let _ = handle.await;

        let err = queue.enqueue(SyncState::default()).unwrap_err();
        assert!(matches!(err, SyncError::ConsolidationClosed));
    }
}
