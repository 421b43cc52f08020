//! Upload and download tests through the capability gate
//!
//! NIST 800-53: SI-11 (Error Handling)

use rain_sftp::storage::MemoryStore;
use rain_sftp::{AuditLogger, BucketNamespace, Capabilities, CapabilityGate, Error, SessionInfo};
use std::sync::Arc;

fn read_write_gate() -> (Arc<MemoryStore>, CapabilityGate) {
    let store = Arc::new(MemoryStore::new());
    let gate = CapabilityGate::new(
        Capabilities {
            can_read: true,
            can_write: true,
        },
        BucketNamespace::new(store.clone()),
        SessionInfo::new(None),
        AuditLogger::default(),
    );
    (store, gate)
}

#[tokio::test]
async fn test_upload_then_download() {
    let (store, gate) = read_write_gate();

    let mut handle = gate.put("/docs/report.txt").unwrap();
    assert_eq!(handle.key(), "docs/report.txt");
    handle.write_at(b"quarterly ", 0).await.unwrap();
    handle.write_at(b"numbers", 10).await.unwrap();

    // Nothing is stored until the handle is committed
    assert!(store.object("docs/report.txt").await.is_none());
    gate.commit("/docs/report.txt", handle).await.unwrap();
    assert_eq!(
        store.object("docs/report.txt").await.unwrap(),
        "quarterly numbers"
    );

    let mut reader = gate.get("/docs/report.txt").await.unwrap();
    let mut buf = vec![0u8; 64];
    let n = reader.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(&buf[..n], b"quarterly numbers");
    assert_eq!(reader.read_at(&mut buf, 17).await.unwrap(), 0);
    assert_eq!(reader.read_at(&mut buf, 1000).await.unwrap(), 0);
}

#[tokio::test]
async fn test_out_of_order_chunks() {
    let (store, gate) = read_write_gate();

    let mut handle = gate.put("/big.bin").unwrap();
    let chunks: Vec<(u64, Vec<u8>)> = (0..8u8)
        .rev()
        .map(|i| (u64::from(i) * 4096, vec![i; 4096]))
        .collect();
    for (offset, data) in &chunks {
        handle.write_at(data, *offset).await.unwrap();
    }
    gate.commit("/big.bin", handle).await.unwrap();

    let stored = store.object("big.bin").await.unwrap();
    assert_eq!(stored.len(), 8 * 4096);
    for i in 0..8u8 {
        let start = usize::from(i) * 4096;
        assert!(stored[start..start + 4096].iter().all(|b| *b == i));
    }
}

#[tokio::test]
async fn test_overwrite_replaces_whole_object() {
    let (store, gate) = read_write_gate();
    store.insert("a.txt", "a much longer original body").await;

    let mut handle = gate.put("/a.txt").unwrap();
    handle.write_at(b"short", 0).await.unwrap();
    gate.commit("/a.txt", handle).await.unwrap();

    assert_eq!(store.object("a.txt").await.unwrap(), "short");
}

#[tokio::test]
async fn test_failed_commit_reports_backend_error() {
    let (store, gate) = read_write_gate();

    let mut handle = gate.put("/a.txt").unwrap();
    handle.write_at(b"data", 0).await.unwrap();
    store.set_unavailable(true);

    assert!(matches!(
        gate.commit("/a.txt", handle).await,
        Err(Error::Backend(_))
    ));
    store.set_unavailable(false);
    assert!(store.object("a.txt").await.is_none());
}

#[tokio::test]
async fn test_get_missing_object() {
    let (_, gate) = read_write_gate();
    assert!(matches!(
        gate.get("/missing.txt").await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn test_put_rejects_directory_paths() {
    let (_, gate) = read_write_gate();
    assert!(matches!(gate.put("/"), Err(Error::InvalidPath(_))));
    assert!(matches!(gate.put("/docs/"), Err(Error::InvalidPath(_))));
}
