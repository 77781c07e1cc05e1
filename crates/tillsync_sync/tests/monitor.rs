//! Connectivity monitor scheduling, driven with a paused clock.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tillsync_store::{EntityStore, EntityType, JsonFileQueue, StoreConfig, SyncStatus};
use tillsync_sync::{
    bootstrap, ConnectivityHandle, ConnectivityMonitor, MockAdapter, MockOp, SyncConfig,
    SyncError, SyncEvent, SyncManager, SyncPassResult, SyncRequester,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Running {
    store: Arc<EntityStore>,
    adapter: Arc<MockAdapter>,
    requester: SyncRequester,
    connectivity: ConnectivityHandle,
    passes: mpsc::UnboundedReceiver<SyncPassResult>,
    task: JoinHandle<()>,
}

fn start() -> Running {
    let config = SyncConfig::default();
    let store = Arc::new(EntityStore::in_memory());
    let manager = Arc::new(SyncManager::new(Arc::clone(&store), config.clone()));
    let adapter = Arc::new(MockAdapter::new(EntityType::Product));
    manager.register_adapter(EntityType::Product, adapter.clone());

    let (tx, passes) = mpsc::unbounded_channel();
    manager.subscribe(move |event| {
        if let SyncEvent::PassCompleted(result) = event {
            let _ = tx.send(result.clone());
        }
    });

    let (monitor, requester, connectivity) = ConnectivityMonitor::new(manager, &config);
    let task = tokio::spawn(monitor.run());
    Running {
        store,
        adapter,
        requester,
        connectivity,
        passes,
        task,
    }
}

fn create_offline(store: &EntityStore, id: &str) {
    store
        .store_entity(EntityType::Product, id, json!({"id": id}), SyncStatus::Pending, 0)
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_sync() {
    let mut m = start();
    create_offline(&m.store, "P1");

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(m.adapter.calls().len(), 0);
    assert!(m.passes.try_recv().is_err());

    m.connectivity.set_online();
    let pass = m.passes.recv().await.unwrap();
    assert_eq!(pass.synced, 1);
    assert_eq!(
        m.store.get_entity(EntityType::Product, "P1").unwrap().sync_status,
        SyncStatus::Synced
    );

    m.requester.shutdown().await.unwrap();
    m.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn offline_requests_wait_for_reconnect() {
    let mut m = start();
    create_offline(&m.store, "P1");

    m.requester.request_all().await.unwrap();
    m.requester.request(EntityType::Product).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(m.adapter.call_count(MockOp::Create), 0);

    m.connectivity.set_online();
    let pass = m.passes.recv().await.unwrap();
    assert_eq!(pass.synced, 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(m.passes.try_recv().is_err());
    assert_eq!(m.adapter.call_count(MockOp::Create), 1);

    m.requester.shutdown().await.unwrap();
    m.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn requests_run_immediately_while_online() {
    let mut m = start();
    m.connectivity.set_online();
    assert_eq!(m.passes.recv().await.unwrap().processed(), 0);

    create_offline(&m.store, "P1");
    let requested_at = Instant::now();
    m.requester.request(EntityType::Product).await.unwrap();
    let pass = m.passes.recv().await.unwrap();
    assert_eq!(pass.synced, 1);
    assert!(requested_at.elapsed() < Duration::from_secs(1));

    m.requester.shutdown().await.unwrap();
    m.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_while_online() {
    let mut m = start();
    m.connectivity.set_online();
    m.passes.recv().await.unwrap();

    let online_at = Instant::now();
    create_offline(&m.store, "P1");
    let pass = m.passes.recv().await.unwrap();
    assert_eq!(pass.synced, 1);
    assert!(online_at.elapsed() >= Duration::from_secs(30));

    m.requester.shutdown().await.unwrap();
    m.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn no_periodic_sync_while_offline() {
    let mut m = start();
    m.connectivity.set_online();
    m.passes.recv().await.unwrap();

    m.connectivity.set_offline();
    create_offline(&m.store, "P1");
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(m.adapter.call_count(MockOp::Create), 0);
    assert!(m.passes.try_recv().is_err());

    m.connectivity.set_online();
    assert_eq!(m.passes.recv().await.unwrap().synced, 1);

    m.requester.shutdown().await.unwrap();
    m.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn monitor_schedules_backoff_retries() {
    let mut m = start();
    m.adapter
        .fail(MockOp::Create, SyncError::remote("service unavailable"));
    create_offline(&m.store, "P1");

    let started = Instant::now();
    m.connectivity.set_online();
    for _ in 0..3 {
        assert_eq!(m.passes.recv().await.unwrap().failed, 1);
    }
    // Backoff of 1s then 2s, well before the 30s interval.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(30));
    assert_eq!(m.adapter.call_count(MockOp::Create), 3);

    // Out of attempts: the next periodic pass does not call the adapter.
    m.adapter.succeed(MockOp::Create);
    assert_eq!(m.passes.recv().await.unwrap().failed, 1);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(m.adapter.call_count(MockOp::Create), 3);

    m.requester.shutdown().await.unwrap();
    m.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropping_requesters_stops_monitor() {
    let m = start();
    let requester = m.requester.clone();
    assert!(requester.try_request(None));
    drop(requester);
    drop(m.requester);
    m.task.await.unwrap();
}

#[tokio::test]
async fn requester_reports_closed_monitor() {
    let m = start();
    m.requester.shutdown().await.unwrap();
    m.task.await.unwrap();
    assert_eq!(m.requester.request_all().await, Err(SyncError::ChannelClosed));
}

#[test]
fn bootstrap_migrates_legacy_queue_once() {
    let tmp = tempfile::tempdir().unwrap();
    let queue_path = tmp.path().join("offline_queue.json");
    std::fs::write(
        &queue_path,
        r#"[{"entity_type": "receipt", "id": "R1", "payload": {"total": 120}}]"#,
    )
    .unwrap();

    let store = EntityStore::open(StoreConfig::at(tmp.path().join("store")));
    let report = bootstrap(&store, &mut JsonFileQueue::new(&queue_path)).unwrap();
    assert_eq!(report.migrated, 1);
    assert_eq!(store.get_total_pending_count(), 1);

    let again = bootstrap(&store, &mut JsonFileQueue::new(&queue_path)).unwrap();
    assert!(again.already_done);
}

#[test]
fn bootstrap_on_degraded_store_is_harmless() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("store");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let queue_path = tmp.path().join("offline_queue.json");
    std::fs::write(&queue_path, r#"[{"entity_type": "sale", "id": "S1"}]"#).unwrap();

    let store = EntityStore::open(StoreConfig::at(&blocker));
    assert!(bootstrap(&store, &mut JsonFileQueue::new(&queue_path)).is_none());
    assert!(queue_path.exists());
}
