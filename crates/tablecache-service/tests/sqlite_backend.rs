//! End-to-end tests of the record cache over a SQLite table.

mod common;

use std::sync::Arc;

use tablecache_service::{CacheConfig, RecordCache};
use tablecache_storage::{CancellationToken, SqliteTable};

use common::{Item, ITEMS_SCHEMA};

#[tokio::test]
async fn flush_pulls_back_server_stamps() {
    let table = Arc::new(SqliteTable::<Item>::in_memory(&[ITEMS_SCHEMA]).unwrap());
    let cache: RecordCache<Item, _> = RecordCache::new(Arc::clone(&table), CacheConfig::default()).unwrap();
    let cancel = CancellationToken::new();

    cache.stage(&Item::new(1, "bolt", 10)).unwrap();
    assert_eq!(cache.flush(&cancel).await.unwrap(), 1);

    let cached = cache.get(&1).unwrap().unwrap();
    assert!(cached.last_modified.is_some());
    assert!(cache.dirty().is_clean());
    assert_eq!(table.count().unwrap(), 1);
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.db");
    let path = path.to_str().unwrap();
    let cancel = CancellationToken::new();

    {
        let table = Arc::new(SqliteTable::<Item>::open(path, &[ITEMS_SCHEMA]).unwrap());
        let cache: RecordCache<Item, _> = RecordCache::new(table, CacheConfig::default()).unwrap();
        cache.stage(&Item::new(1, "bolt", 10)).unwrap();
        cache.stage(&Item::new(2, "nut", 20)).unwrap();
        cache.refresh(&cancel).await.unwrap();
    }

    let table = Arc::new(SqliteTable::<Item>::open(path, &[ITEMS_SCHEMA]).unwrap());
    let cache: RecordCache<Item, _> = RecordCache::new(table, CacheConfig::default()).unwrap();
    let report = cache.refresh(&cancel).await.unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(cache.get(&2).unwrap().map(|i| i.name), Some("nut".to_string()));

    let fetched = cache.get_or_fetch(&1, &cancel).await.unwrap();
    assert_eq!(fetched.map(|i| i.qty), Some(10));
}
