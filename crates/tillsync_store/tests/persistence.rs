//! On-disk behavior of the entity store: reopen, locking, recovery.

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tillsync_store::{
    migrate_legacy_queue, EntityStore, EntityType, JsonFileQueue, PendingOperation, StoreConfig,
    StoreDir, SyncOutcome, SyncStatus,
};

fn open(dir: &std::path::Path) -> EntityStore {
    EntityStore::open(StoreConfig::at(dir))
}

#[test]
fn state_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("store");
    let synced_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();

    {
        let store = open(&path);
        assert!(!store.is_degraded());
        store
            .store_entity(
                EntityType::Product,
                "P1",
                json!({"name": "Tea", "price": 350}),
                SyncStatus::Pending,
                0,
            )
            .unwrap();
        store
            .store_entity(
                EntityType::Customer,
                "C1",
                json!({"name": "Ada"}),
                SyncStatus::Synced,
                4,
            )
            .unwrap();
        store.queue_deletion(EntityType::Customer, "C1").unwrap();
        assert!(store.record_sync_time(EntityType::Product, synced_at));
    }

    let store = open(&path);
    let product = store.get_entity(EntityType::Product, "P1").unwrap();
    assert_eq!(product.payload["price"], 350);
    assert_eq!(product.operation, Some(PendingOperation::Create));

    let customer = store.get_entity(EntityType::Customer, "C1").unwrap();
    assert!(customer.deleted);
    assert_eq!(customer.local_version, 2);
    assert_eq!(customer.remote_version, 4);
    assert_eq!(customer.operation, Some(PendingOperation::Delete));

    let meta = store.get_metadata(EntityType::Product);
    assert_eq!(meta.last_sync_timestamp, Some(synced_at));
    assert_eq!(meta.pending_count, 1);
    assert_eq!(store.get_total_pending_count(), 2);
}

#[test]
fn sync_outcomes_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = open(tmp.path());
        let saved = store
            .store_entity(EntityType::Sale, "S1", json!({"total": 10}), SyncStatus::Pending, 0)
            .unwrap();
        store
            .apply_sync_outcome(
                EntityType::Sale,
                "S1",
                saved.local_version,
                SyncOutcome::synced(1),
            )
            .unwrap();
    }

    let store = open(tmp.path());
    let sale = store.get_entity(EntityType::Sale, "S1").unwrap();
    assert_eq!(sale.sync_status, SyncStatus::Synced);
    assert_eq!(sale.remote_version, 1);
    assert_eq!(sale.operation, None);
}

#[test]
fn file_in_place_of_directory_degrades() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("not-a-dir");
    fs::write(&path, b"occupied").unwrap();

    let store = open(&path);
    assert!(store.is_degraded());
    assert!(store.degraded_reason().is_some());

    assert!(store
        .store_entity(EntityType::Product, "P1", json!({}), SyncStatus::Pending, 0)
        .is_none());
    assert!(store.queue_deletion(EntityType::Product, "P1").is_none());
    assert!(store.list_entities(EntityType::Product, None).is_empty());
    assert_eq!(store.get_status_counts().total(), 0);
    assert!(!store.record_sync_time(EntityType::Product, Utc::now()));
    assert_eq!(store.clear_all(), 0);
    assert!(store.compact().is_none());
}

#[test]
fn missing_directory_without_create_degrades() {
    let tmp = tempfile::tempdir().unwrap();
    let store = EntityStore::open(
        StoreConfig::at(tmp.path().join("absent")).create_if_missing(false),
    );
    assert!(store.is_degraded());
}

#[test]
fn second_opener_is_degraded_while_first_holds_lock() {
    let tmp = tempfile::tempdir().unwrap();
    let first = open(tmp.path());
    assert!(!first.is_degraded());

    let second = open(tmp.path());
    assert!(second.is_degraded());

    drop(first);
    let third = open(tmp.path());
    assert!(!third.is_degraded());
}

#[test]
fn torn_tail_is_discarded() {
    let tmp = tempfile::tempdir().unwrap();
    let size = {
        let store = open(tmp.path());
        store
            .store_entity(EntityType::Invoice, "I1", json!({"n": 1}), SyncStatus::Pending, 0)
            .unwrap();
        store
            .store_entity(EntityType::Invoice, "I2", json!({"n": 2}), SyncStatus::Pending, 0)
            .unwrap();
        store.log_size()
    };

    // A crash mid-append leaves half a header behind.
    let mut file = OpenOptions::new()
        .append(true)
        .open(StoreDir::log_path_in(tmp.path()))
        .unwrap();
    file.write_all(b"TSLG\x01").unwrap();
    drop(file);

    let store = open(tmp.path());
    assert!(!store.is_degraded());
    assert_eq!(store.list_entities(EntityType::Invoice, None).len(), 2);
    assert_eq!(store.log_size(), size);

    store
        .store_entity(EntityType::Invoice, "I3", json!({"n": 3}), SyncStatus::Pending, 0)
        .unwrap();
    drop(store);
    assert_eq!(open(tmp.path()).list_entities(EntityType::Invoice, None).len(), 3);
}

fn preserved_copies(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with(".corrupt"))
        .collect()
}

#[test]
fn corrupted_last_record_is_set_aside() {
    let tmp = tempfile::tempdir().unwrap();
    let first_len = {
        let store = open(tmp.path());
        store
            .store_entity(EntityType::Receipt, "R1", json!({"n": 1}), SyncStatus::Pending, 0)
            .unwrap();
        let first_len = store.log_size();
        store
            .store_entity(EntityType::Receipt, "R2", json!({"n": 2}), SyncStatus::Pending, 0)
            .unwrap();
        first_len
    };

    let log_path = StoreDir::log_path_in(tmp.path());
    let mut bytes = fs::read(&log_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&log_path, &bytes).unwrap();

    let store = open(tmp.path());
    assert!(!store.is_degraded());
    assert!(store.get_entity(EntityType::Receipt, "R1").is_some());
    assert!(store.get_entity(EntityType::Receipt, "R2").is_none());
    assert_eq!(store.log_size(), first_len);

    let copies = preserved_copies(tmp.path());
    assert_eq!(copies.len(), 1);
    assert_eq!(fs::read(&copies[0]).unwrap(), bytes);
}

#[test]
fn damaged_middle_record_keeps_later_records() {
    let tmp = tempfile::tempdir().unwrap();
    let (first_len, second_len) = {
        let store = open(tmp.path());
        let mut ends = Vec::new();
        for id in ["S1", "S2", "S3", "S4"] {
            store
                .store_entity(EntityType::Sale, id, json!({"id": id}), SyncStatus::Pending, 0)
                .unwrap();
            ends.push(store.log_size());
        }
        (ends[0] as usize, (ends[1] - ends[0]) as usize)
    };

    let log_path = StoreDir::log_path_in(tmp.path());
    let original = fs::read(&log_path).unwrap();
    let mut bytes = original.clone();
    bytes[first_len + second_len - 1] ^= 0xFF;
    fs::write(&log_path, &bytes).unwrap();

    {
        let store = open(tmp.path());
        assert!(!store.is_degraded());
        let ids: Vec<String> = store
            .list_entities(EntityType::Sale, None)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, ["S1", "S3", "S4"]);

        store
            .store_entity(EntityType::Sale, "S5", json!({"id": "S5"}), SyncStatus::Pending, 0)
            .unwrap();
    }

    let copies = preserved_copies(tmp.path());
    assert_eq!(copies.len(), 1);
    assert_eq!(fs::read(&copies[0]).unwrap().len(), original.len());

    // The rewritten log replays cleanly and keeps appends made after recovery.
    let store = open(tmp.path());
    assert_eq!(store.list_entities(EntityType::Sale, None).len(), 4);
    assert_eq!(preserved_copies(tmp.path()).len(), 1);
}

#[test]
fn compaction_then_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = open(tmp.path());
        for i in 0..20 {
            store
                .store_entity(
                    EntityType::Inventory,
                    "stock-1",
                    json!({"qty": i}),
                    SyncStatus::Pending,
                    0,
                )
                .unwrap();
        }
        store.queue_deletion(EntityType::Category, "gone").unwrap();
        let stats = store.compact().unwrap();
        assert_eq!(stats.records, 2);
        assert!(stats.bytes_after < stats.bytes_before);
    }

    let store = open(tmp.path());
    let stock = store.get_entity(EntityType::Inventory, "stock-1").unwrap();
    assert_eq!(stock.payload["qty"], 19);
    assert_eq!(stock.local_version, 20);
    assert!(store.get_entity(EntityType::Category, "gone").unwrap().deleted);
}

#[test]
fn legacy_queue_migrates_once_across_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let store_path = tmp.path().join("store");
    let queue_path = tmp.path().join("offline_queue.json");
    let legacy = r#"[
        {"entity_type": "sale", "id": "S1", "payload": {"total": 990}},
        {"entity_type": "product", "id": "P9", "operation": "delete", "remote_version": 3}
    ]"#;
    fs::write(&queue_path, legacy).unwrap();

    {
        let store = open(&store_path);
        let report = migrate_legacy_queue(&store, &mut JsonFileQueue::new(&queue_path)).unwrap();
        assert_eq!(report.migrated, 2);
        assert!(!report.already_done);
        assert!(!queue_path.exists());
    }

    // A stale copy of the queue reappears, e.g. restored from a backup.
    fs::write(&queue_path, legacy).unwrap();
    let store = open(&store_path);
    let report = migrate_legacy_queue(&store, &mut JsonFileQueue::new(&queue_path)).unwrap();
    assert!(report.already_done);
    assert_eq!(report.migrated, 0);
    assert!(store.legacy_migrated_at().is_some());

    let sale = store.get_entity(EntityType::Sale, "S1").unwrap();
    assert_eq!(sale.operation, Some(PendingOperation::Create));
    let product = store.get_entity(EntityType::Product, "P9").unwrap();
    assert!(product.deleted);
    assert_eq!(product.remote_version, 3);
    assert_eq!(product.sync_status, SyncStatus::Pending);
}
