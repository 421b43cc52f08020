//! SFTP packet-level tests
//!
//! NIST 800-53: SI-10 (Information Input Validation), SI-11 (Error Handling)
//! Implementation: Requests are encoded the way an SFTP client sends them and
//! fed to one session; replies are decoded and checked.

use bytes::{BufMut, BytesMut};
use rain_sftp::protocol::{FileAttrs, MessageType, OpenFlags, PacketBuffer, StatusCode, codec, frame};
use rain_sftp::storage::MemoryStore;
use rain_sftp::{AuditLogger, BucketNamespace, Capabilities, CapabilityGate, Error, SessionInfo, SftpSession};
use std::sync::Arc;

fn session(can_read: bool, can_write: bool) -> (Arc<MemoryStore>, SftpSession) {
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
    (store, SftpSession::new(gate))
}

/// Request builder
struct Request(BytesMut);

impl Request {
    fn new(msg: MessageType, request_id: u32) -> Self {
        let mut buf = BytesMut::new();
        buf.put_u8(msg as u8);
        buf.put_u32(request_id);
        Self(buf)
    }

    fn string(mut self, s: &str) -> Self {
        codec::put_string(&mut self.0, s);
        self
    }

    fn bytes(mut self, data: &[u8]) -> Self {
        codec::put_bytes(&mut self.0, data);
        self
    }

    fn u32(mut self, v: u32) -> Self {
        self.0.put_u32(v);
        self
    }

    fn u64(mut self, v: u64) -> Self {
        self.0.put_u64(v);
        self
    }

    fn no_attrs(self) -> Self {
        self.u32(0)
    }

    fn build(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Decoded reply
#[derive(Debug)]
enum Reply {
    Status(u32),
    Handle(Vec<u8>),
    Data(Vec<u8>),
    Name(Vec<String>),
    Attrs(FileAttrs),
}

fn decode(reply: &[u8], expected_id: u32) -> Reply {
    let (&kind, mut buf) = reply.split_first().unwrap();
    let request_id = codec::get_u32(&mut buf).unwrap();
    assert_eq!(request_id, expected_id);

    match MessageType::try_from(kind).unwrap() {
        MessageType::Status => Reply::Status(codec::get_u32(&mut buf).unwrap()),
        MessageType::Handle => Reply::Handle(codec::get_bytes(&mut buf).unwrap()),
        MessageType::Data => Reply::Data(codec::get_bytes(&mut buf).unwrap()),
        MessageType::Name => {
            let count = codec::get_u32(&mut buf).unwrap();
            let names = (0..count)
                .map(|_| {
                    let name = codec::get_string(&mut buf).unwrap();
                    codec::get_string(&mut buf).unwrap();
                    FileAttrs::decode(&mut buf).unwrap();
                    name
                })
                .collect();
            Reply::Name(names)
        }
        MessageType::Attrs => Reply::Attrs(FileAttrs::decode(&mut buf).unwrap()),
        other => panic!("unexpected reply {other:?}"),
    }
}

async fn call(session: &mut SftpSession, request: Request, request_id: u32) -> Reply {
    let reply = session.handle_packet(&request.build()).await.unwrap();
    decode(&reply, request_id)
}

async fn init(session: &mut SftpSession) {
    let mut packet = BytesMut::new();
    packet.put_u8(MessageType::Init as u8);
    packet.put_u32(3);
    let reply = session.handle_packet(&packet).await.unwrap();
    assert_eq!(reply, vec![MessageType::Version as u8, 0, 0, 0, 3]);
}

fn status(code: StatusCode) -> u32 {
    code.into()
}

#[tokio::test]
async fn test_request_before_init_is_protocol_error() {
    let (_, mut session) = session(true, true);
    let packet = Request::new(MessageType::Stat, 1).string("/").build();
    assert!(matches!(
        session.handle_packet(&packet).await,
        Err(Error::Protocol(_))
    ));
}

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let (store, mut session) = session(true, true);
    init(&mut session).await;

    let open = Request::new(MessageType::Open, 1)
        .string("/docs/a.txt")
        .u32(OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC)
        .no_attrs();
    let Reply::Handle(handle) = call(&mut session, open, 1).await else {
        panic!("expected a handle");
    };

    let write = Request::new(MessageType::Write, 2)
        .bytes(&handle)
        .u64(6)
        .bytes(b"world");
    assert!(matches!(call(&mut session, write, 2).await, Reply::Status(0)));
    let write = Request::new(MessageType::Write, 3)
        .bytes(&handle)
        .u64(0)
        .bytes(b"hello ");
    assert!(matches!(call(&mut session, write, 3).await, Reply::Status(0)));
    assert!(store.object("docs/a.txt").await.is_none());

    let close = Request::new(MessageType::Close, 4).bytes(&handle);
    assert!(matches!(call(&mut session, close, 4).await, Reply::Status(0)));
    assert_eq!(store.object("docs/a.txt").await.unwrap(), "hello world");
    assert_eq!(session.open_handles(), 0);

    let open = Request::new(MessageType::Open, 5)
        .string("/docs/a.txt")
        .u32(OpenFlags::READ)
        .no_attrs();
    let Reply::Handle(handle) = call(&mut session, open, 5).await else {
        panic!("expected a handle");
    };

    let read = Request::new(MessageType::Read, 6).bytes(&handle).u64(6).u32(1024);
    match call(&mut session, read, 6).await {
        Reply::Data(data) => assert_eq!(data, b"world"),
        other => panic!("expected data, got {other:?}"),
    }

    let read = Request::new(MessageType::Read, 7).bytes(&handle).u64(11).u32(1024);
    assert!(matches!(
        call(&mut session, read, 7).await,
        Reply::Status(code) if code == status(StatusCode::Eof)
    ));

    let fstat = Request::new(MessageType::Fstat, 8).bytes(&handle);
    match call(&mut session, fstat, 8).await {
        Reply::Attrs(attrs) => assert_eq!(attrs.size, Some(11)),
        other => panic!("expected attrs, got {other:?}"),
    }
}

#[tokio::test]
async fn test_read_write_open_is_unsupported() {
    let (store, mut session) = session(true, true);
    init(&mut session).await;

    let open = Request::new(MessageType::Open, 1)
        .string("/a.txt")
        .u32(OpenFlags::READ | OpenFlags::WRITE)
        .no_attrs();
    assert!(matches!(
        call(&mut session, open, 1).await,
        Reply::Status(code) if code == status(StatusCode::OpUnsupported)
    ));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_read_only_session_denied_writes() {
    let (store, mut session) = session(true, false);
    init(&mut session).await;

    let denied = status(StatusCode::PermissionDenied);
    let requests = vec![
        Request::new(MessageType::Open, 1)
            .string("/a.txt")
            .u32(OpenFlags::WRITE | OpenFlags::CREAT)
            .no_attrs(),
        Request::new(MessageType::Mkdir, 1).string("/docs").no_attrs(),
        Request::new(MessageType::Rmdir, 1).string("/docs"),
        Request::new(MessageType::Remove, 1).string("/a.txt"),
        Request::new(MessageType::Rename, 1).string("/a.txt").string("/b.txt"),
        Request::new(MessageType::Setstat, 1).string("/a.txt").no_attrs(),
        Request::new(MessageType::Symlink, 1).string("/l").string("/a.txt"),
    ];
    for request in requests {
        assert!(matches!(
            call(&mut session, request, 1).await,
            Reply::Status(code) if code == denied
        ));
    }
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_unsupported_verbs_with_write_capability() {
    let (_, mut session) = session(true, true);
    init(&mut session).await;

    let unsupported = status(StatusCode::OpUnsupported);
    let requests = vec![
        Request::new(MessageType::Rename, 1).string("/a.txt").string("/b.txt"),
        Request::new(MessageType::Readlink, 1).string("/a.txt"),
        Request::new(MessageType::Symlink, 1).string("/l").string("/a.txt"),
        Request::new(MessageType::Extended, 1)
            .string("hardlink@openssh.com")
            .string("/a.txt")
            .string("/b.txt"),
        Request::new(MessageType::Extended, 1).string("statvfs@openssh.com").string("/"),
    ];
    for request in requests {
        assert!(matches!(
            call(&mut session, request, 1).await,
            Reply::Status(code) if code == unsupported
        ));
    }
}

#[tokio::test]
async fn test_directory_listing_pages() {
    let (store, mut session) = session(true, false);
    for i in 0..150 {
        store.insert(format!("logs/{i:03}.log"), "x").await;
    }
    init(&mut session).await;

    let opendir = Request::new(MessageType::Opendir, 1).string("/logs");
    let Reply::Handle(handle) = call(&mut session, opendir, 1).await else {
        panic!("expected a handle");
    };

    let mut names = Vec::new();
    for id in 2.. {
        let readdir = Request::new(MessageType::Readdir, id).bytes(&handle);
        match call(&mut session, readdir, id).await {
            Reply::Name(page) => {
                assert!(page.len() <= 100);
                names.extend(page);
            }
            Reply::Status(code) => {
                assert_eq!(code, status(StatusCode::Eof));
                break;
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    assert_eq!(names.len(), 150);
    assert_eq!(names[0], "000.log");
    assert_eq!(names[149], "149.log");
}

#[tokio::test]
async fn test_stat_and_realpath() {
    let (store, mut session) = session(true, false);
    store.insert("docs/", "").await;
    init(&mut session).await;

    let stat = Request::new(MessageType::Stat, 1).string("/docs");
    match call(&mut session, stat, 1).await {
        Reply::Attrs(attrs) => assert_eq!(attrs.permissions.map(|p| p & 0o170_000), Some(0o040_000)),
        other => panic!("expected attrs, got {other:?}"),
    }

    let stat = Request::new(MessageType::Lstat, 2).string("/missing");
    assert!(matches!(
        call(&mut session, stat, 2).await,
        Reply::Status(code) if code == status(StatusCode::NoSuchFile)
    ));

    let realpath = Request::new(MessageType::Realpath, 3).string("docs/../docs/./a");
    match call(&mut session, realpath, 3).await {
        Reply::Name(names) => assert_eq!(names, vec!["/docs/a".to_string()]),
        other => panic!("expected name, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_handle() {
    let (_, mut session) = session(true, true);
    init(&mut session).await;

    let read = Request::new(MessageType::Read, 9).bytes(b"nope").u64(0).u32(16);
    assert!(matches!(
        call(&mut session, read, 9).await,
        Reply::Status(code) if code == status(StatusCode::BadMessage)
    ));
}

#[tokio::test]
async fn test_framed_stream_split_across_chunks() {
    let (_, mut session) = session(true, false);

    let mut init_packet = BytesMut::new();
    init_packet.put_u8(MessageType::Init as u8);
    init_packet.put_u32(3);
    let mut stream = frame(&init_packet).to_vec();
    stream.extend_from_slice(&frame(&Request::new(MessageType::Stat, 1).string("/").build()));

    let mut buffer = PacketBuffer::new();
    let mut replies = Vec::new();
    for chunk in stream.chunks(3) {
        buffer.extend(chunk);
        while let Some(packet) = buffer.next_packet().unwrap() {
            replies.push(session.handle_packet(&packet).await.unwrap());
        }
    }

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0][0], MessageType::Version as u8);
    assert!(matches!(decode(&replies[1], 1), Reply::Attrs(_)));
}
