//! Capability gate tests
//!
//! NIST 800-53: AC-3 (Access Enforcement), AC-6 (Least Privilege)
//! STIG: V-222596 (Authorization enforcement)
//! Implementation: A refused verb makes no storage call; unimplemented verbs
//! are refused only after the capability check.

use rain_sftp::storage::MemoryStore;
use rain_sftp::{AuditLogger, BucketNamespace, Capabilities, CapabilityGate, Error, SessionInfo, Verb};
use std::sync::Arc;

fn gate(can_read: bool, can_write: bool) -> (Arc<MemoryStore>, CapabilityGate) {
    let store = Arc::new(MemoryStore::new());
    let gate = CapabilityGate::new(
        Capabilities {
            can_read,
            can_write,
        },
        BucketNamespace::new(store.clone()),
        SessionInfo::new(None),
        AuditLogger::new(false),
    );
    (store, gate)
}

/// NIST 800-53: AC-3 - Read and list verbs need can_read
#[tokio::test]
async fn test_no_read_capability_never_reaches_storage() {
    let (store, gate) = gate(false, true);
    store.insert("a.txt", "hello").await;

    assert!(matches!(gate.get("/a.txt").await, Err(Error::PermissionDenied(_))));
    assert!(matches!(gate.list("/").await, Err(Error::PermissionDenied(_))));
    assert!(matches!(gate.stat("/a.txt").await, Err(Error::PermissionDenied(_))));
    assert_eq!(store.call_count(), 0);
}

/// NIST 800-53: AC-3 - Write and structural verbs need can_write
#[tokio::test]
async fn test_no_write_capability_never_reaches_storage() {
    let (store, gate) = gate(true, false);
    store.insert("a.txt", "hello").await;

    assert!(matches!(gate.put("/b.txt"), Err(Error::PermissionDenied(_))));
    assert!(matches!(gate.mkdir("/docs").await, Err(Error::PermissionDenied(_))));
    assert!(matches!(gate.rmdir("/docs").await, Err(Error::PermissionDenied(_))));
    assert!(matches!(gate.remove("/a.txt").await, Err(Error::PermissionDenied(_))));
    assert_eq!(store.call_count(), 0);
    assert_eq!(store.keys().await, vec!["a.txt"]);
}

#[tokio::test]
async fn test_granted_verbs_pass_through() {
    let (store, gate) = gate(true, true);
    store.insert("a.txt", "hello").await;

    let listing = gate.list("/").await.unwrap();
    let (entries, eof) = listing.list_at(10, 0);
    assert_eq!(entries.len(), 1);
    assert!(eof);
    assert_eq!(gate.stat("/a.txt").await.unwrap().size, 5);

    gate.mkdir("/docs").await.unwrap();
    gate.remove("/a.txt").await.unwrap();
    assert_eq!(store.keys().await, vec!["docs/"]);
}

#[tokio::test]
async fn test_unimplemented_verbs_check_capability_first() {
    let (store, read_only) = gate(true, false);
    for verb in [Verb::Rename, Verb::Link, Verb::Symlink, Verb::Setstat, Verb::Open] {
        assert!(
            matches!(read_only.unsupported(verb, "/a"), Err(Error::PermissionDenied(_))),
            "{verb}"
        );
    }
    assert!(matches!(
        read_only.unsupported(Verb::Readlink, "/a"),
        Err(Error::NotSupported(_))
    ));

    let (_, read_write) = gate(true, true);
    for verb in [Verb::Rename, Verb::Link, Verb::Symlink, Verb::Setstat, Verb::Open] {
        assert!(
            matches!(read_write.unsupported(verb, "/a"), Err(Error::NotSupported(_))),
            "{verb}"
        );
    }
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_read_only_session_can_download() {
    let (store, gate) = gate(true, false);
    store.insert("docs/a.txt", "hello world").await;

    let mut reader = gate.get("/docs/a.txt").await.unwrap();
    let mut buf = [0u8; 5];
    let n = reader.read_at(&mut buf, 6).await.unwrap();
    assert_eq!(&buf[..n], b"world");
}
