use super::*;
use chrono::TimeZone;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap()
}

fn config(dir: PathBuf) -> StoreConfig {
    StoreConfig {
        enabled: true,
        directory: dir,
        flush_interval_seconds: 60,
        keep_count: 2,
    }
}

#[test]
fn test_member_slots_and_clear_group() {
    let store = PreviousStateStore::new();
    store.set(&member_key("sensor.house_energy", "sensor.tv_energy"), 4.5, ts(0));
    store.set(&member_key("sensor.house_energy", "sensor.fridge_energy"), 12.0, ts(0));
    store.set(&member_key("sensor.garage_energy", "sensor.tv_energy"), 1.0, ts(0));
    store.set("sensor.house_energy", 16.5, ts(0));

    assert_eq!(store.get("sensor.house_energy::sensor.tv_energy").unwrap().value, 4.5);
    assert_eq!(store.clear_group("sensor.house_energy"), 2);
    assert_eq!(store.get("sensor.house_energy::sensor.tv_energy"), None);
    assert!(store.get("sensor.garage_energy::sensor.tv_energy").is_some());
    // The total row is not a member slot
    assert!(store.get("sensor.house_energy").is_some());
}

#[test]
fn test_dirty_tracking() {
    let store = PreviousStateStore::new();
    assert!(!store.is_dirty());

    store.set("a", 1.0, ts(0));
    assert!(store.is_dirty());
    assert!(store.take_dirty());
    assert!(!store.is_dirty());

    assert_eq!(store.remove("missing"), None);
    assert!(!store.is_dirty());
    store.remove("a");
    assert!(store.is_dirty());
}

#[test]
fn test_snapshot_save_and_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.json.gz");

    let store = PreviousStateStore::new();
    store.set("sensor.house_energy", 123.456, ts(5));
    store.set(&member_key("sensor.house_energy", "sensor.tv_energy"), 3.2, ts(5));
    store.snapshot().save_to_file(&path).unwrap();

    let loaded = StoreSnapshot::load_from_file(&path).unwrap();
    assert_eq!(loaded.store_version, "1");
    assert_eq!(loaded.value_count(), 2);

    let restored = PreviousStateStore::from_snapshot(loaded);
    assert!(!restored.is_dirty());
    assert_eq!(
        restored.get("sensor.house_energy"),
        Some(StoredValue {
            value: 123.456,
            last_updated: ts(5)
        })
    );
}

#[test]
fn test_load_plain_json() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store-legacy.json");
    let snapshot = PreviousStateStore::new().snapshot();
    fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

    assert_eq!(StoreSnapshot::load_from_file(&path).unwrap().value_count(), 0);
}

#[test]
fn test_storage_missing_and_empty_directory() {
    let temp_dir = TempDir::new().unwrap();

    let missing = FileStorage::new(temp_dir.path().join("nonexistent"), 3);
    assert!(missing.load_latest().unwrap().is_none());

    let empty = FileStorage::new(temp_dir.path(), 3);
    assert!(empty.load_latest().unwrap().is_none());
}

#[test]
fn test_storage_picks_newest_and_rotates() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileStorage::new(temp_dir.path(), 2);

    let store = PreviousStateStore::new();
    for i in 0..4 {
        store.set("sensor.total", i as f64, ts(i));
        storage.save(&store.snapshot()).unwrap();
    }

    assert_eq!(storage.list_files().unwrap().len(), 2);
    let latest = storage.load_latest().unwrap().unwrap();
    assert_eq!(latest.values["sensor.total"].value, 3.0);
}

#[test]
fn test_storage_falls_back_on_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileStorage::new(temp_dir.path(), 5);

    let store = PreviousStateStore::new();
    store.set("sensor.total", 42.0, ts(0));
    storage.save(&store.snapshot()).unwrap();

    // Sorts after every real file
    fs::write(temp_dir.path().join("store-99999999T999999.999Z-999999.json.gz"), b"not gzip").unwrap();

    let latest = storage.load_latest().unwrap().unwrap();
    assert_eq!(latest.values["sensor.total"].value, 42.0);
}

#[test]
fn test_storage_all_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("store-20240101T000000.000Z-000000.json.gz"), b"bad").unwrap();
    fs::write(temp_dir.path().join("store-20240102T000000.000Z-000000.json.gz"), b"worse").unwrap();

    let storage = FileStorage::new(temp_dir.path(), 5);
    assert!(storage.load_latest().unwrap().is_none());
}

#[test]
fn test_flush_now_skips_clean_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(PreviousStateStore::new());
    let flusher = StoreFlusher::new(store.clone(), config(temp_dir.path().to_path_buf()));

    assert!(!flusher.flush_now().unwrap());

    store.set("sensor.total", 1.0, ts(0));
    assert!(flusher.flush_now().unwrap());
    assert!(!flusher.flush_now().unwrap());

    let storage = FileStorage::new(temp_dir.path(), 2);
    assert_eq!(storage.list_files().unwrap().len(), 1);
}

#[test]
fn test_flush_failure_keeps_store_dirty() {
    let temp_dir = TempDir::new().unwrap();
    // A file where the directory should be
    let blocked = temp_dir.path().join("blocked");
    fs::write(&blocked, b"").unwrap();

    let store = Arc::new(PreviousStateStore::new());
    let flusher = StoreFlusher::new(store.clone(), config(blocked));

    store.set("sensor.total", 1.0, ts(0));
    assert!(flusher.flush_now().is_err());
    assert!(store.is_dirty());
}

#[test]
fn test_disabled_flusher_never_writes() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(PreviousStateStore::new());
    let mut cfg = config(temp_dir.path().join("store"));
    cfg.enabled = false;
    let flusher = StoreFlusher::new(store.clone(), cfg);

    store.set("sensor.total", 1.0, ts(0));
    assert!(!flusher.flush_now().unwrap());
    assert!(!temp_dir.path().join("store").exists());
}

#[tokio::test]
async fn test_flush_loop_writes_periodically() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(PreviousStateStore::new());
    let mut cfg = config(temp_dir.path().to_path_buf());
    cfg.flush_interval_seconds = 1;
    let flusher = Arc::new(StoreFlusher::new(store.clone(), cfg));

    let task = {
        let flusher = flusher.clone();
        tokio::spawn(async move { flusher.run_flush_loop().await })
    };

    store.set("sensor.total", 7.0, ts(0));
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    task.abort();

    assert!(!store.is_dirty());
    let storage = FileStorage::new(temp_dir.path(), 2);
    assert_eq!(storage.list_files().unwrap().len(), 1);
}
