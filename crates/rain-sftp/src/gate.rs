//! Capability enforcement for every filesystem verb
//!
//! NIST 800-53: AC-3 (Access Enforcement), AC-6 (Least Privilege), AU-2 (Audit Events)
//! STIG: V-222596 (Authorization enforcement)
//! Implementation: Each verb is classified as needing read or write access. A
//! refused verb never reaches the namespace or the object store, and verbs the
//! gateway does not implement are answered only after the check passes.

use crate::audit::{AuditLogger, Outcome, SessionInfo};
use crate::auth::Capabilities;
use crate::lister::ListingCursor;
use crate::namespace::{BucketNamespace, DirEntry};
use crate::reader::ReadAdapter;
use crate::writer::StagedWrite;
use crate::{Error, Result};
use std::fmt;

/// Gateway verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Open for read
    Get,
    /// Open for write
    Put,
    /// Open for read and write
    Open,
    /// Directory listing
    List,
    /// Attributes by path or handle
    Stat,
    /// Read symbolic link
    Readlink,
    /// Create directory
    Mkdir,
    /// Remove directory
    Rmdir,
    /// Remove file
    Remove,
    /// Rename
    Rename,
    /// Hard link
    Link,
    /// Symbolic link
    Symlink,
    /// Set attributes
    Setstat,
}

/// Capability a verb needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `can_read`
    Read,
    /// `can_write`
    Write,
}

impl Verb {
    /// Capability required before the verb may run
    pub const fn required_access(self) -> Access {
        match self {
            Self::Get | Self::List | Self::Stat | Self::Readlink => Access::Read,
            Self::Put
            | Self::Open
            | Self::Mkdir
            | Self::Rmdir
            | Self::Remove
            | Self::Rename
            | Self::Link
            | Self::Symlink
            | Self::Setstat => Access::Write,
        }
    }

    /// Verb name used in audit records
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "Get",
            Self::Put => "Put",
            Self::Open => "Open",
            Self::List => "List",
            Self::Stat => "Stat",
            Self::Readlink => "Readlink",
            Self::Mkdir => "Mkdir",
            Self::Rmdir => "Rmdir",
            Self::Remove => "Remove",
            Self::Rename => "Rename",
            Self::Link => "Link",
            Self::Symlink => "Symlink",
            Self::Setstat => "Setstat",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Capabilities {
    /// Whether these capabilities cover `access`
    pub const fn allows(self, access: Access) -> bool {
        match access {
            Access::Read => self.can_read,
            Access::Write => self.can_write,
        }
    }
}

/// Per-session gate in front of the namespace
#[derive(Debug)]
pub struct CapabilityGate {
    capabilities: Capabilities,
    namespace: BucketNamespace,
    session: SessionInfo,
    audit: AuditLogger,
}

impl CapabilityGate {
    /// Gate `namespace` with the capabilities granted at login
    pub const fn new(
        capabilities: Capabilities,
        namespace: BucketNamespace,
        session: SessionInfo,
        audit: AuditLogger,
    ) -> Self {
        Self {
            capabilities,
            namespace,
            session,
            audit,
        }
    }

    /// Capabilities this gate enforces
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Session the gate belongs to
    pub const fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Enforce the verb's capability
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    fn check(&self, verb: Verb, path: &str) -> Result<()> {
        if self.capabilities.allows(verb.required_access()) {
            return Ok(());
        }
        let err = Error::PermissionDenied(format!("{verb} {path}"));
        self.audit.operation(
            &self.session,
            verb.as_str(),
            path,
            Outcome::Denied,
            Some(err.sanitized_message()),
        );
        Err(err)
    }

    fn finish<T>(&self, verb: Verb, path: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self
                .audit
                .operation(&self.session, verb.as_str(), path, Outcome::Success, None),
            Err(e) => self.audit.operation(
                &self.session,
                verb.as_str(),
                path,
                Outcome::Failed,
                Some(e.to_string()),
            ),
        }
        result
    }

    /// Refuse a verb the gateway does not implement, after the capability check
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without the capability, otherwise
    /// [`Error::NotSupported`].
    pub fn unsupported(&self, verb: Verb, path: &str) -> Result<()> {
        self.check(verb, path)?;
        self.finish(verb, path, Err(Error::not_supported(verb.as_str())))
    }

    /// Open `path` for reading
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without `can_read`, otherwise the
    /// namespace error.
    pub async fn get(&self, path: &str) -> Result<ReadAdapter> {
        self.check(Verb::Get, path)?;
        let result = self.namespace.open_read(path).await;
        self.finish(Verb::Get, path, result)
    }

    /// Open `path` for writing
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without `can_write`, otherwise the
    /// namespace error.
    pub fn put(&self, path: &str) -> Result<StagedWrite> {
        self.check(Verb::Put, path)?;
        let result = self.namespace.open_write(path);
        self.finish(Verb::Put, path, result)
    }

    /// Commit a write handle opened with [`CapabilityGate::put`]
    ///
    /// # Errors
    ///
    /// Returns the upload error.
    pub async fn commit(&self, path: &str, handle: StagedWrite) -> Result<()> {
        let result = self.namespace.commit(handle).await;
        self.finish(Verb::Put, path, result)
    }

    /// List the directory at `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without `can_read`, otherwise the
    /// namespace error.
    pub async fn list(&self, path: &str) -> Result<ListingCursor> {
        self.check(Verb::List, path)?;
        let result = self.namespace.list(path).await.map(ListingCursor::new);
        self.finish(Verb::List, path, result)
    }

    /// Attributes of `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without `can_read`, otherwise the
    /// namespace error.
    pub async fn stat(&self, path: &str) -> Result<DirEntry> {
        self.check(Verb::Stat, path)?;
        let result = self.namespace.stat(path).await;
        self.finish(Verb::Stat, path, result)
    }

    /// Create a directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without `can_write`, otherwise the
    /// namespace error.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.check(Verb::Mkdir, path)?;
        let result = self.namespace.mkdir(path).await;
        self.finish(Verb::Mkdir, path, result)
    }

    /// Remove a directory marker
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without `can_write`, otherwise the
    /// namespace error.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.check(Verb::Rmdir, path)?;
        let result = self.namespace.rmdir(path).await;
        self.finish(Verb::Rmdir, path, result)
    }

    /// Remove a file
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without `can_write`, otherwise the
    /// namespace error.
    pub async fn remove(&self, path: &str) -> Result<()> {
        self.check(Verb::Remove, path)?;
        let result = self.namespace.remove(path).await;
        self.finish(Verb::Remove, path, result)
    }
}
