//! Cache backends: in-memory TLRU and disk.

use std::time::Duration;

use durflow::backend::{CacheBackend, DiskBackend, MemoryBackend};

// ===== MemoryBackend =====

#[tokio::test]
async fn memory_set_get_delete() {
    let backend = MemoryBackend::new(10, None);
    assert!(backend.get("k").await.unwrap().is_none());

    backend.set("k", b"v".to_vec(), None).await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));

    assert!(backend.delete("k").await.unwrap());
    assert!(!backend.delete("k").await.unwrap());
    assert!(backend.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn memory_evicts_least_recently_used() {
    let backend = MemoryBackend::new(2, None);
    backend.set("a", b"1".to_vec(), None).await.unwrap();
    backend.set("b", b"2".to_vec(), None).await.unwrap();

    // Touch "a" so "b" is the least recently used.
    backend.get("a").await.unwrap();
    backend.set("c", b"3".to_vec(), None).await.unwrap();

    assert_eq!(backend.len(), 2);
    assert!(backend.get("a").await.unwrap().is_some());
    assert!(backend.get("b").await.unwrap().is_none());
    assert!(backend.get("c").await.unwrap().is_some());
}

#[tokio::test]
async fn memory_ttl_expiry() {
    let backend = MemoryBackend::new(10, Some(Duration::from_millis(30)));
    backend.set("short", b"x".to_vec(), None).await.unwrap();
    backend
        .set("long", b"y".to_vec(), Some(Duration::from_secs(60)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(backend.get("short").await.unwrap().is_none());
    assert_eq!(backend.get("long").await.unwrap(), Some(b"y".to_vec()));
}

#[tokio::test]
async fn memory_clear() {
    let backend = MemoryBackend::new(10, None);
    backend.set("a", b"1".to_vec(), None).await.unwrap();
    backend.clear().await.unwrap();
    assert!(backend.is_empty());
}

// ===== DiskBackend =====

#[tokio::test]
async fn disk_set_get_delete() {
    let dir = tempfile::tempdir().unwrap();
    let backend = DiskBackend::with_defaults(dir.path());

    backend.set("k", b"hello".to_vec(), None).await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), Some(b"hello".to_vec()));
    assert_eq!(backend.len().await.unwrap(), 1);

    assert!(backend.delete("k").await.unwrap());
    assert!(backend.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn disk_binary_values_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let backend = DiskBackend::with_defaults(dir.path());
    let bytes = vec![0u8, 159, 146, 150, 255];
    backend.set("bin", bytes.clone(), None).await.unwrap();
    assert_eq!(backend.get("bin").await.unwrap(), Some(bytes));
}

#[tokio::test]
async fn disk_entries_are_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let backend = DiskBackend::with_defaults(dir.path());
    backend
        .set("k", br#"{"a":1}"#.to_vec(), Some(Duration::from_secs(60)))
        .await
        .unwrap();

    let mut entries = std::fs::read_dir(dir.path()).unwrap();
    let path = entries.next().unwrap().unwrap().path();
    let entry: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(entry["key"], "k");
    assert_eq!(entry["value"], serde_json::json!({"a": 1}));
    assert!(entry["expires_at"].is_string());
}

#[tokio::test]
async fn disk_expired_entries_are_evicted_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let backend = DiskBackend::new(dir.path(), 1024 * 1024, Some(Duration::from_millis(30)));
    backend.set("k", b"v".to_vec(), None).await.unwrap();
    assert_eq!(backend.len().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(backend.get("k").await.unwrap().is_none());
    assert_eq!(backend.len().await.unwrap(), 0);
}

#[tokio::test]
async fn disk_size_limit_evicts_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let payload = vec![b'x'; 400];
    // Room for two entries, not three.
    let backend = DiskBackend::new(dir.path(), 1200, None);

    backend.set("first", payload.clone(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    backend.set("second", payload.clone(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    backend.set("third", payload.clone(), None).await.unwrap();

    assert!(backend.volume().await.unwrap() <= 1200);
    assert!(backend.get("first").await.unwrap().is_none());
    assert!(backend.get("third").await.unwrap().is_some());
}

#[tokio::test]
async fn disk_reopen_finds_entries() {
    let dir = tempfile::tempdir().unwrap();
    DiskBackend::with_defaults(dir.path())
        .set("k", b"persisted".to_vec(), None)
        .await
        .unwrap();

    let reopened = DiskBackend::with_defaults(dir.path());
    assert_eq!(reopened.get("k").await.unwrap(), Some(b"persisted".to_vec()));
}

#[tokio::test]
async fn disk_concurrent_writers_last_wins() {
    let dir = tempfile::tempdir().unwrap();
    let backend = std::sync::Arc::new(DiskBackend::with_defaults(dir.path()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            backend
                .set("shared", format!("value-{}", i).into_bytes(), None)
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let value = String::from_utf8(backend.get("shared").await.unwrap().unwrap()).unwrap();
    assert!(value.starts_with("value-"));
    assert_eq!(backend.len().await.unwrap(), 1);
}
