//! SFTP wire format
//!
//! Version 3 of the SSH File Transfer Protocol (draft-ietf-secsh-filexfer-02),
//! carried over the `sftp` subsystem of an SSH session channel (RFC 4254).
//!
//! Packets are `uint32 length || byte type || payload`. SSH channel data has no
//! packet boundaries, so incoming bytes go through [`PacketBuffer`] before they
//! are decoded.

use crate::namespace::DirEntry;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// SFTP Protocol Version
pub const SFTP_VERSION: u32 = 3;

/// Largest packet accepted from a client
///
/// NIST 800-53: SC-5 (Denial of Service Protection)
pub const MAX_PACKET_LEN: usize = 1024 * 1024;

/// Mode reported for every file
pub const FILE_MODE: u32 = 0o100_644;

/// Mode reported for every directory
pub const DIRECTORY_MODE: u32 = 0o040_755;

/// SFTP message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Initialize SFTP session
    Init = 1,
    /// Version response
    Version = 2,
    /// Open file
    Open = 3,
    /// Close handle
    Close = 4,
    /// Read from file
    Read = 5,
    /// Write to file
    Write = 6,
    /// Attributes by path, not following links
    Lstat = 7,
    /// Attributes by handle
    Fstat = 8,
    /// Set attributes by path
    Setstat = 9,
    /// Set attributes by handle
    Fsetstat = 10,
    /// Open directory
    Opendir = 11,
    /// Read directory entries
    Readdir = 12,
    /// Remove file
    Remove = 13,
    /// Create directory
    Mkdir = 14,
    /// Remove directory
    Rmdir = 15,
    /// Canonicalize path
    Realpath = 16,
    /// Attributes by path
    Stat = 17,
    /// Rename
    Rename = 18,
    /// Read symbolic link
    Readlink = 19,
    /// Create symbolic link
    Symlink = 20,
    /// Status response
    Status = 101,
    /// Handle response
    Handle = 102,
    /// Data response
    Data = 103,
    /// Name response
    Name = 104,
    /// Attributes response
    Attrs = 105,
    /// Extended request
    Extended = 200,
    /// Extended reply
    ExtendedReply = 201,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        let message = match value {
            1 => Self::Init,
            2 => Self::Version,
            3 => Self::Open,
            4 => Self::Close,
            5 => Self::Read,
            6 => Self::Write,
            7 => Self::Lstat,
            8 => Self::Fstat,
            9 => Self::Setstat,
            10 => Self::Fsetstat,
            11 => Self::Opendir,
            12 => Self::Readdir,
            13 => Self::Remove,
            14 => Self::Mkdir,
            15 => Self::Rmdir,
            16 => Self::Realpath,
            17 => Self::Stat,
            18 => Self::Rename,
            19 => Self::Readlink,
            20 => Self::Symlink,
            101 => Self::Status,
            102 => Self::Handle,
            103 => Self::Data,
            104 => Self::Name,
            105 => Self::Attrs,
            200 => Self::Extended,
            201 => Self::ExtendedReply,
            _ => return Err(Error::Protocol(format!("Unknown message type: {value}"))),
        };
        Ok(message)
    }
}

/// SFTP status codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// End of file
    Eof = 1,
    /// No such file or directory
    NoSuchFile = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// General failure
    Failure = 4,
    /// Bad message
    BadMessage = 5,
    /// No connection
    NoConnection = 6,
    /// Connection lost
    ConnectionLost = 7,
    /// Operation not supported
    OpUnsupported = 8,
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        code as Self
    }
}

/// `pflags` of an OPEN request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// `SSH_FXF_READ`
    pub const READ: u32 = 0x0000_0001;
    /// `SSH_FXF_WRITE`
    pub const WRITE: u32 = 0x0000_0002;
    /// `SSH_FXF_APPEND`
    pub const APPEND: u32 = 0x0000_0004;
    /// `SSH_FXF_CREAT`
    pub const CREAT: u32 = 0x0000_0008;
    /// `SSH_FXF_TRUNC`
    pub const TRUNC: u32 = 0x0000_0010;
    /// `SSH_FXF_EXCL`
    pub const EXCL: u32 = 0x0000_0020;

    /// Opened for reading
    pub const fn has_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    /// Opened for writing (any of write, append, create, truncate)
    pub const fn has_write(self) -> bool {
        self.0 & (Self::WRITE | Self::APPEND | Self::CREAT | Self::TRUNC) != 0
    }
}

/// File attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// Size in bytes
    pub size: Option<u64>,
    /// Owner uid
    pub uid: Option<u32>,
    /// Owner gid
    pub gid: Option<u32>,
    /// Mode bits including the file type
    pub permissions: Option<u32>,
    /// Access time (seconds since epoch)
    pub atime: Option<u32>,
    /// Modification time (seconds since epoch)
    pub mtime: Option<u32>,
}

impl FileAttrs {
    const FLAG_SIZE: u32 = 0x0000_0001;
    const FLAG_UIDGID: u32 = 0x0000_0002;
    const FLAG_PERMISSIONS: u32 = 0x0000_0004;
    const FLAG_ACMODTIME: u32 = 0x0000_0008;
    const FLAG_EXTENDED: u32 = 0x8000_0000;

    /// Attributes reported for a gateway entry: size, fixed mode, mtime
    pub fn from_entry(entry: &DirEntry) -> Self {
        let mtime = u32::try_from(entry.modified.timestamp().max(0)).unwrap_or(u32::MAX);
        Self {
            size: Some(entry.size),
            uid: None,
            gid: None,
            permissions: Some(if entry.is_dir { DIRECTORY_MODE } else { FILE_MODE }),
            atime: Some(mtime),
            mtime: Some(mtime),
        }
    }

    /// Encode into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u32;

        if self.size.is_some() {
            flags |= Self::FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= Self::FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= Self::FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= Self::FLAG_ACMODTIME;
        }

        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
    }

    /// Decode from `buf`, skipping extended attribute pairs
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on truncated input.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let flags = codec::get_u32(buf)?;
        let mut attrs = Self::default();

        if flags & Self::FLAG_SIZE != 0 {
            attrs.size = Some(codec::get_u64(buf)?);
        }
        if flags & Self::FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf)?);
            attrs.gid = Some(codec::get_u32(buf)?);
        }
        if flags & Self::FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf)?);
        }
        if flags & Self::FLAG_ACMODTIME != 0 {
            attrs.atime = Some(codec::get_u32(buf)?);
            attrs.mtime = Some(codec::get_u32(buf)?);
        }
        if flags & Self::FLAG_EXTENDED != 0 {
            let count = codec::get_u32(buf)?;
            for _ in 0..count {
                codec::get_bytes(buf)?;
                codec::get_bytes(buf)?;
            }
        }

        Ok(attrs)
    }
}

/// `ls -l` style line sent as the longname of a NAME entry
pub fn longname(entry: &DirEntry) -> String {
    let mode = if entry.is_dir { "drwxr-xr-x" } else { "-rw-r--r--" };
    format!(
        "{mode}    1 0        0        {:>12} {} {}",
        entry.size,
        entry.modified.format("%b %d %H:%M"),
        entry.name
    )
}

/// Reassembles SFTP packets from SSH channel data
///
/// NIST 800-53: SI-10 (Information Input Validation)
#[derive(Debug, Default)]
pub struct PacketBuffer {
    pending: BytesMut,
}

impl PacketBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append channel data
    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Take the next complete packet (type byte and payload, without the
    /// length prefix), or `None` until more data arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for empty or oversized packets.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>> {
        if self.pending.len() < 4 {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([
            self.pending[0],
            self.pending[1],
            self.pending[2],
            self.pending[3],
        ]);
        let len = usize::try_from(declared)
            .map_err(|_| Error::Protocol(format!("Packet length {declared} too large")))?;

        if len == 0 {
            return Err(Error::Protocol("Empty packet".into()));
        }
        if len > MAX_PACKET_LEN {
            return Err(Error::Protocol(format!(
                "Packet length {len} exceeds limit of {MAX_PACKET_LEN}"
            )));
        }
        if self.pending.len() < 4 + len {
            return Ok(None);
        }

        self.pending.advance(4);
        Ok(Some(self.pending.split_to(len).freeze()))
    }
}

/// Prefix a packet body with its length
pub fn frame(body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(body.len() + 4);
    codec::put_bytes(&mut out, body);
    out.freeze()
}

/// Primitive encoders and decoders
pub mod codec {
    use crate::{Error, Result};
    use bytes::{Buf, BufMut, BytesMut};

    fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<()> {
        if buf.len() < needed {
            return Err(Error::Protocol(format!("Insufficient data for {what}")));
        }
        Ok(())
    }

    /// Decode a `uint32`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on truncated input.
    pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
        ensure(buf, 4, "uint32")?;
        Ok(buf.get_u32())
    }

    /// Decode a `uint64`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on truncated input.
    pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
        ensure(buf, 8, "uint64")?;
        Ok(buf.get_u64())
    }

    /// Encode a `string`
    pub fn put_string(buf: &mut BytesMut, s: &str) {
        put_bytes(buf, s.as_bytes());
    }

    /// Decode a UTF-8 `string`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on truncated input or invalid UTF-8.
    pub fn get_string(buf: &mut &[u8]) -> Result<String> {
        let bytes = get_bytes(buf)?;
        String::from_utf8(bytes).map_err(|e| Error::Protocol(format!("Invalid UTF-8 string: {e}")))
    }

    /// Encode a length-prefixed byte string
    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        // Packets are capped well below u32::MAX
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    /// Decode a length-prefixed byte string
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on truncated input.
    pub fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
        let len = get_u32(buf)? as usize;
        ensure(buf, len, "string")?;
        let bytes = buf[..len].to_vec();
        buf.advance(len);
        Ok(bytes)
    }
}
