//! SFTP request dispatch
//!
//! Decodes one SFTP packet at a time, routes it through the session's
//! [`CapabilityGate`] and encodes the reply. Transport concerns (framing, SSH
//! channels) live in `server`; this type only sees whole packets.
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-10 (Information Input Validation),
//! SI-11 (Error Handling)

use crate::gate::{CapabilityGate, Verb};
use crate::lister::{ListingCursor, READDIR_WINDOW};
use crate::namespace::canonicalize;
use crate::protocol::{
    FileAttrs, MessageType, OpenFlags, SFTP_VERSION, StatusCode, codec, longname,
};
use crate::reader::ReadAdapter;
use crate::writer::StagedWrite;
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Largest READ served in one DATA reply
pub const MAX_READ_LEN: u32 = 256 * 1024;

/// Open handle state
enum Handle {
    Read { path: String, reader: ReadAdapter },
    Write { path: String, writer: StagedWrite },
    Dir { path: String, listing: ListingCursor, offset: usize },
}

impl Handle {
    fn path(&self) -> &str {
        match self {
            Self::Read { path, .. } | Self::Write { path, .. } | Self::Dir { path, .. } => path,
        }
    }
}

/// SFTP session state for one channel
///
/// NIST 800-53: SI-11 (Error Handling), AC-12 (Session Termination)
/// Implementation: Open handles are released when the session is dropped;
/// uncommitted writes are discarded with their staging files.
pub struct SftpSession {
    gate: CapabilityGate,
    handles: HashMap<Vec<u8>, Handle>,
    next_handle_id: u32,
    initialized: bool,
}

impl std::fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession")
            .field("gate", &self.gate)
            .field("open_handles", &self.handles.len())
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        let pending_writes = self
            .handles
            .values()
            .filter(|handle| matches!(handle, Handle::Write { .. }))
            .count();
        if pending_writes > 0 {
            warn!(
                session_id = %self.gate.session().session_id,
                pending_writes,
                "Session ended with uncommitted writes; staged data discarded"
            );
        }
    }
}

impl SftpSession {
    /// Create a session serving requests through `gate`
    pub fn new(gate: CapabilityGate) -> Self {
        Self {
            gate,
            handles: HashMap::new(),
            next_handle_id: 0,
            initialized: false,
        }
    }

    /// Number of open handles
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Handle one SFTP packet (type byte and payload) and return the reply
    /// packet, without its length prefix.
    ///
    /// Failures of the requested operation are answered with a STATUS reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for a packet that cannot be decoded or that
    /// arrives before INIT; the connection should be dropped.
    pub async fn handle_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let Some((&type_byte, payload)) = packet.split_first() else {
            return Err(Error::Protocol("Empty packet".into()));
        };
        let mut buf = payload;

        let msg_type = match MessageType::try_from(type_byte) {
            Ok(msg_type) => msg_type,
            Err(e) => {
                warn!(type_byte, "Unknown SFTP message type");
                let request_id = codec::get_u32(&mut buf).map_err(|_| e)?;
                return Ok(status(request_id, StatusCode::OpUnsupported, "Unknown message type"));
            }
        };

        debug!(message = ?msg_type, "Received SFTP message");

        if !self.initialized && msg_type != MessageType::Init {
            return Err(Error::Protocol("Session not initialized".into()));
        }

        let buf = &mut buf;
        match msg_type {
            MessageType::Init => self.handle_init(buf),
            MessageType::Open => self.handle_open(buf).await,
            MessageType::Close => self.handle_close(buf).await,
            MessageType::Read => self.handle_read(buf).await,
            MessageType::Write => self.handle_write(buf).await,
            MessageType::Stat | MessageType::Lstat => self.handle_stat(buf).await,
            MessageType::Fstat => self.handle_fstat(buf).await,
            MessageType::Setstat => self.handle_setstat(buf),
            MessageType::Fsetstat => self.handle_fsetstat(buf),
            MessageType::Opendir => self.handle_opendir(buf).await,
            MessageType::Readdir => self.handle_readdir(buf),
            MessageType::Remove => self.handle_remove(buf).await,
            MessageType::Mkdir => self.handle_mkdir(buf).await,
            MessageType::Rmdir => self.handle_rmdir(buf).await,
            MessageType::Realpath => Self::handle_realpath(buf),
            MessageType::Rename => self.handle_rename(buf),
            MessageType::Readlink => self.handle_readlink(buf),
            MessageType::Symlink => self.handle_symlink(buf),
            MessageType::Extended => self.handle_extended(buf),
            _ => {
                let request_id = codec::get_u32(buf)?;
                warn!(message = ?msg_type, "Client sent a server-only message");
                Ok(status(request_id, StatusCode::BadMessage, "Unexpected message"))
            }
        }
    }

    fn handle_init(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let version = codec::get_u32(buf)?;
        info!(client_version = version, "SFTP session initialized");
        self.initialized = true;

        let mut response = BytesMut::new();
        response.put_u8(MessageType::Version as u8);
        response.put_u32(SFTP_VERSION);
        Ok(response.to_vec())
    }

    async fn handle_open(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        let flags = OpenFlags(codec::get_u32(buf)?);
        FileAttrs::decode(buf)?;

        let opened = if flags.has_read() && flags.has_write() {
            self.gate.unsupported(Verb::Open, &path).map(|()| None)
        } else if flags.has_write() {
            self.gate.put(&path).map(|writer| {
                Some(Handle::Write {
                    path: path.clone(),
                    writer,
                })
            })
        } else {
            self.gate.get(&path).await.map(|reader| {
                Some(Handle::Read {
                    path: path.clone(),
                    reader,
                })
            })
        };

        Ok(match opened {
            Ok(Some(handle)) => {
                let id = self.allocate_handle(handle);
                handle_response(request_id, &id)
            }
            Ok(None) => status(request_id, StatusCode::OpUnsupported, "Unsupported"),
            Err(e) => status_error(request_id, &e),
        })
    }

    async fn handle_close(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let id = codec::get_bytes(buf)?;

        let Some(handle) = self.handles.remove(&id) else {
            return Ok(status_error(request_id, &Error::invalid_handle("unknown handle")));
        };

        let result = match handle {
            Handle::Write { path, writer } => self.gate.commit(&path, writer).await,
            Handle::Read { .. } | Handle::Dir { .. } => Ok(()),
        };

        Ok(match result {
            Ok(()) => status(request_id, StatusCode::Ok, "Success"),
            Err(e) => status_error(request_id, &e),
        })
    }

    async fn handle_read(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let id = codec::get_bytes(buf)?;
        let offset = codec::get_u64(buf)?;
        let len = codec::get_u32(buf)?.min(MAX_READ_LEN);

        let Some(Handle::Read { reader, .. }) = self.handles.get_mut(&id) else {
            return Ok(status_error(request_id, &Error::invalid_handle("not a read handle")));
        };

        let mut data = vec![0u8; len as usize];
        Ok(match reader.read_at(&mut data, offset).await {
            Ok(0) => status(request_id, StatusCode::Eof, "End of file"),
            Ok(n) => {
                data.truncate(n);
                data_response(request_id, &data)
            }
            Err(e) => status_error(request_id, &e),
        })
    }

    async fn handle_write(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let id = codec::get_bytes(buf)?;
        let offset = codec::get_u64(buf)?;
        let data = codec::get_bytes(buf)?;

        let Some(Handle::Write { writer, .. }) = self.handles.get_mut(&id) else {
            return Ok(status_error(request_id, &Error::invalid_handle("not a write handle")));
        };

        Ok(match writer.write_at(&data, offset).await {
            Ok(()) => status(request_id, StatusCode::Ok, "Success"),
            Err(e) => status_error(request_id, &e),
        })
    }

    async fn handle_stat(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        Ok(self.stat_response(request_id, &path).await)
    }

    async fn handle_fstat(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let id = codec::get_bytes(buf)?;
        let Some(path) = self.handles.get(&id).map(|handle| handle.path().to_string()) else {
            return Ok(status_error(request_id, &Error::invalid_handle("unknown handle")));
        };
        Ok(self.stat_response(request_id, &path).await)
    }

    // Handles are not `Sync`, so only the gate is borrowed across the await
    async fn stat_response(&mut self, request_id: u32, path: &str) -> Vec<u8> {
        match self.gate.stat(path).await {
            Ok(entry) => attrs_response(request_id, &FileAttrs::from_entry(&entry)),
            Err(e) => status_error(request_id, &e),
        }
    }

    fn handle_setstat(&self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        FileAttrs::decode(buf)?;
        Ok(self.unsupported(request_id, Verb::Setstat, &path))
    }

    fn handle_fsetstat(&self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let id = codec::get_bytes(buf)?;
        FileAttrs::decode(buf)?;
        let Some(handle) = self.handles.get(&id) else {
            return Ok(status_error(request_id, &Error::invalid_handle("unknown handle")));
        };
        Ok(self.unsupported(request_id, Verb::Setstat, handle.path()))
    }

    async fn handle_opendir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;

        Ok(match self.gate.list(&path).await {
            Ok(listing) => {
                let id = self.allocate_handle(Handle::Dir {
                    path,
                    listing,
                    offset: 0,
                });
                handle_response(request_id, &id)
            }
            Err(e) => status_error(request_id, &e),
        })
    }

    fn handle_readdir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let id = codec::get_bytes(buf)?;

        let Some(Handle::Dir {
            listing, offset, ..
        }) = self.handles.get_mut(&id)
        else {
            return Ok(status_error(request_id, &Error::invalid_handle("not a directory handle")));
        };

        let (page, _) = listing.list_at(READDIR_WINDOW, *offset);
        if page.is_empty() {
            return Ok(status(request_id, StatusCode::Eof, "End of directory"));
        }
        *offset += page.len();

        let names: Vec<(String, String, FileAttrs)> = page
            .iter()
            .map(|entry| (entry.name.clone(), longname(entry), FileAttrs::from_entry(entry)))
            .collect();
        Ok(name_response(request_id, &names))
    }

    async fn handle_remove(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        Ok(unit_response(request_id, self.gate.remove(&path).await))
    }

    async fn handle_mkdir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        FileAttrs::decode(buf)?;
        Ok(unit_response(request_id, self.gate.mkdir(&path).await))
    }

    async fn handle_rmdir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        Ok(unit_response(request_id, self.gate.rmdir(&path).await))
    }

    fn handle_realpath(buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        let resolved = canonicalize(&path);
        debug!(path = %path, resolved = %resolved, "Resolved path");
        Ok(name_response(
            request_id,
            &[(resolved.clone(), resolved, FileAttrs::default())],
        ))
    }

    fn handle_rename(&self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let from = codec::get_string(buf)?;
        codec::get_string(buf)?;
        Ok(self.unsupported(request_id, Verb::Rename, &from))
    }

    fn handle_readlink(&self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        Ok(self.unsupported(request_id, Verb::Readlink, &path))
    }

    fn handle_symlink(&self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let link = codec::get_string(buf)?;
        codec::get_string(buf)?;
        Ok(self.unsupported(request_id, Verb::Symlink, &link))
    }

    fn handle_extended(&self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let request = codec::get_string(buf)?;

        let verb = match request.as_str() {
            "hardlink@openssh.com" => Verb::Link,
            "posix-rename@openssh.com" => Verb::Rename,
            _ => {
                debug!(request = %request, "Unsupported extended request");
                return Ok(status(request_id, StatusCode::OpUnsupported, "Unsupported"));
            }
        };
        let path = codec::get_string(buf)?;
        Ok(self.unsupported(request_id, verb, &path))
    }

    fn unsupported(&self, request_id: u32, verb: Verb, path: &str) -> Vec<u8> {
        unit_response(request_id, self.gate.unsupported(verb, path))
    }

    fn allocate_handle(&mut self, handle: Handle) -> Vec<u8> {
        let id = self.next_handle_id.to_be_bytes().to_vec();
        self.next_handle_id = self.next_handle_id.wrapping_add(1);
        self.handles.insert(id.clone(), handle);
        id
    }
}

fn unit_response(request_id: u32, result: Result<()>) -> Vec<u8> {
    match result {
        Ok(()) => status(request_id, StatusCode::Ok, "Success"),
        Err(e) => status_error(request_id, &e),
    }
}

fn status(request_id: u32, code: StatusCode, msg: &str) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(MessageType::Status as u8);
    response.put_u32(request_id);
    response.put_u32(code.into());
    codec::put_string(&mut response, msg);
    codec::put_string(&mut response, "en");
    response.to_vec()
}

/// STATUS reply carrying a sanitized error
///
/// STIG: V-222566
fn status_error(request_id: u32, error: &Error) -> Vec<u8> {
    if !error.is_client_error() {
        warn!(request_id, error = %error, "Request failed");
    }
    let mut response = BytesMut::new();
    response.put_u8(MessageType::Status as u8);
    response.put_u32(request_id);
    response.put_u32(error.to_status_code());
    codec::put_string(&mut response, &error.sanitized_message());
    codec::put_string(&mut response, "en");
    response.to_vec()
}

fn handle_response(request_id: u32, handle: &[u8]) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(MessageType::Handle as u8);
    response.put_u32(request_id);
    codec::put_bytes(&mut response, handle);
    response.to_vec()
}

fn data_response(request_id: u32, data: &[u8]) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(MessageType::Data as u8);
    response.put_u32(request_id);
    codec::put_bytes(&mut response, data);
    response.to_vec()
}

fn attrs_response(request_id: u32, attrs: &FileAttrs) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(MessageType::Attrs as u8);
    response.put_u32(request_id);
    attrs.encode(&mut response);
    response.to_vec()
}

fn name_response(request_id: u32, names: &[(String, String, FileAttrs)]) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(MessageType::Name as u8);
    response.put_u32(request_id);
    // READDIR pages and REALPATH answers are far below u32::MAX entries
    #[allow(clippy::cast_possible_truncation)]
    response.put_u32(names.len() as u32);
    for (filename, long, attrs) in names {
        codec::put_string(&mut response, filename);
        codec::put_string(&mut response, long);
        attrs.encode(&mut response);
    }
    response.to_vec()
}
