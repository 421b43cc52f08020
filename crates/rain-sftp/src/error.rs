//! Error types for gateway operations
//!
//! NIST 800-53: SI-11 (Error Handling), AU-3 (Content of Audit Records)
//! STIG: V-222566 - The application must generate error messages that provide information
//! necessary for corrective actions without revealing information that could be exploited
//! Implementation: One error taxonomy shared by authentication, the capability gate,
//! the directory emulation layer and the SFTP transport

use crate::storage::StorageError;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway error types
///
/// NIST 800-53: SI-11 (Error Handling)
/// STIG: V-222566
/// Implementation: Error types that provide context without exposing sensitive information
#[derive(Error, Debug)]
pub enum Error {
    /// Local I/O error (staging files, host key files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object storage failure, surfaced verbatim and never retried
    ///
    /// NIST 800-53: SI-11
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// SSH protocol error
    ///
    /// NIST 800-53: SI-11, SC-8 (Transmission Confidentiality)
    #[error("SSH error: {0}")]
    Ssh(String),

    /// SFTP protocol error
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// Authentication failed
    ///
    /// NIST 800-53: IA-2 (Identification and Authentication), SI-11
    /// STIG: V-222566
    /// Implementation: Covers bad credentials and an unreachable directory service
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No object at the resolved key or directory marker
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Capability gate veto
    ///
    /// NIST 800-53: AC-3 (Access Enforcement), SI-11
    /// STIG: V-222596, V-222566
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid path
    ///
    /// NIST 800-53: SI-10 (Input Validation), SI-11
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Missing or invalid startup configuration; always fatal
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid or closed file handle
    #[error("Invalid file handle: {0}")]
    InvalidHandle(String),

    /// Verb not implemented for the object storage model
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// SSH channel unexpectedly closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error is due to client input
    ///
    /// # NIST 800-53: SI-10 (Input Validation), SI-11
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath(_)
                | Self::FileNotFound(_)
                | Self::PermissionDenied(_)
                | Self::InvalidHandle(_)
                | Self::NotSupported(_)
                | Self::Protocol(_)
        )
    }

    /// Check if error is security-related and should be audited as such
    ///
    /// # NIST 800-53: AU-2 (Audit Events), SI-11
    pub const fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::PermissionDenied(_) | Self::InvalidPath(_)
        )
    }

    /// Get error code for SFTP STATUS message
    ///
    /// # NIST 800-53: SI-11
    /// # Implementation: Maps errors to RFC-compliant status codes
    pub fn to_status_code(&self) -> u32 {
        use crate::protocol::StatusCode;

        let code = match self {
            Self::FileNotFound(_) => StatusCode::NoSuchFile,
            Self::PermissionDenied(_) => StatusCode::PermissionDenied,
            Self::InvalidPath(_) | Self::InvalidHandle(_) | Self::Protocol(_) => {
                StatusCode::BadMessage
            }
            Self::NotSupported(_) => StatusCode::OpUnsupported,
            Self::ChannelClosed(_) => StatusCode::ConnectionLost,
            _ => StatusCode::Failure,
        };
        code.into()
    }

    /// Get sanitized error message for client
    ///
    /// # STIG: V-222566
    /// # Implementation: Removes sensitive information from error messages
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::Authentication(_) => "Authentication failed".to_string(),
            Self::PermissionDenied(_) => "Permission denied".to_string(),
            Self::InvalidPath(_) => "Invalid path".to_string(),
            Self::Config(_) => "Server configuration error".to_string(),
            // Backend messages may carry endpoint or bucket names
            Self::Backend(_) | Self::Io(_) => "Failure".to_string(),
            _ => self.to_string(),
        }
    }

    /// Create channel closed error
    pub fn channel_closed(context: impl Into<String>) -> Self {
        Self::ChannelClosed(context.into())
    }

    /// Create invalid handle error
    pub fn invalid_handle(context: impl Into<String>) -> Self {
        Self::InvalidHandle(context.into())
    }

    /// Create unsupported operation error
    pub fn not_supported(verb: impl Into<String>) -> Self {
        Self::NotSupported(verb.into())
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Self::Ssh(err.to_string())
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::FileNotFound(key),
            StorageError::Io(e) => Self::Io(e),
            other => Self::Backend(other.to_string()),
        }
    }
}
