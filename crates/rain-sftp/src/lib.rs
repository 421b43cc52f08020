//! # Rain SFTP
//!
//! SFTP gateway in front of an S3-compatible bucket.
//!
//! Clients speak SFTP (draft-ietf-secsh-filexfer-02) over SSH (RFC 4251-4254);
//! the gateway maps the requests onto object keys in one bucket:
//!
//! - Paths map to object keys; "directories" are `/`-delimited prefixes and
//!   optional zero-length `name/` marker objects
//! - Uploads are staged in a temporary file and stored on close
//! - Downloads read the object with ranged requests
//! - Logins are checked against bcrypt password users or an LDAP directory,
//!   optionally with public keys, and grant read and/or write capabilities
//! - Every filesystem verb passes a capability gate before reaching storage

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod lister;
pub mod namespace;
pub mod protocol;
pub mod reader;
pub mod server;
pub mod sftp;
pub mod storage;
pub mod writer;

pub use audit::{AuditLogger, SessionInfo};
pub use auth::{AuthCoordinator, Capabilities, Identity};
pub use config::{Config, LogFormat};
pub use error::{Error, Result};
pub use gate::{CapabilityGate, Verb};
pub use namespace::{BucketNamespace, DirEntry};
pub use server::Server;
pub use sftp::SftpSession;
pub use storage::{ObjectStore, StorageError};
