//! Sync states flow from the engine through the worker to the graph.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use idsync_core::{
    Consolidate, ConsolidationWorker, IdentityCache, MokaCache, SyncEngine, SyncRequest,
    SyncResponse, SyncState,
};
use idsync_graph::{CollapseOutcome, CollapseSignal, GraphError, GraphResult, SkipReason};

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<CollapseSignal>>,
    fail_first: bool,
}

#[async_trait]
impl Consolidate for Recording {
    async fn consolidate(&self, signal: &CollapseSignal) -> GraphResult<CollapseOutcome> {
        let count = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(signal.clone());
            seen.len()
        };
        if self.fail_first && count == 1 {
            return Err(GraphError::InvalidInput {
                message: "boom".to_string(),
            });
        }
        Ok(CollapseOutcome::Skipped(SkipReason::MissingUserAgent))
    }
}

fn request(cookie_id: &str) -> SyncRequest {
    SyncRequest {
        partner_cookie_id: "xyz456".to_string(),
        partner_id: "pdq123".to_string(),
        client_ip: "220.120.12.13".to_string(),
        user_agent: "test-user-agent".to_string(),
        cookie_id: Some(cookie_id.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_engine_forwards_states_to_worker() {
    let recording = Arc::new(Recording::default());
    let (queue, handle) = ConsolidationWorker::spawn(recording.clone(), 16);

    let engine = SyncEngine::new(Arc::new(MokaCache::<SyncState>::new(64)), "a.osintami.com")
        .with_queue(queue);
    engine.sync(request("muid-1")).unwrap();
    engine.sync(request("muid-2")).unwrap();

    // Dropping the engine drops the last queue handle and stops the worker.
    drop(engine);
    handle.await.unwrap();

    let seen = recording.seen.lock().unwrap();
    let ids: Vec<&str> = seen.iter().map(|s| s.cookie_id.as_str()).collect();
    assert_eq!(ids, vec!["muid-1", "muid-2"]);
    let partner = seen[0].partner.as_ref().unwrap();
    assert_eq!(partner.partner_id, "pdq123");
    assert_eq!(seen[0].addr, "220.120.12.13");
}

#[tokio::test]
async fn test_worker_survives_consolidation_errors() {
    let recording = Arc::new(Recording {
        fail_first: true,
        ..Default::default()
    });
    let (queue, handle) = ConsolidationWorker::spawn(recording.clone(), 16);

    queue.enqueue(SyncState::default()).unwrap();
    queue.enqueue(SyncState::default()).unwrap();
    drop(queue);
    handle.await.unwrap();

    assert_eq!(recording.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stopped_worker_does_not_fail_sync() {
    let (queue, handle) = ConsolidationWorker::spawn(Arc::new(Recording::default()), 4);
    handle.abort();
    let _ = handle.await;

    let cache = Arc::new(MokaCache::<SyncState>::new(64));
    let engine = SyncEngine::new(Arc::clone(&cache), "a.osintami.com").with_queue(queue);

    let outcome = engine.sync(request("muid-1")).expect("sync succeeds without a worker");
    assert_eq!(outcome.cookie.value, "muid-1");
    assert_eq!(outcome.response, SyncResponse::NoContent);
    assert!(cache.get("muid-1").is_some());
}
