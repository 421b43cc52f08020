//! Audit trail and session tracking
//!
//! NIST 800-53: AU-2 (Audit Events), AU-3 (Content of Audit Records), AU-12 (Audit Generation)
//! STIG: V-222648 (Audit Records)
//! Implementation: Structured audit records for connections, logins and every
//! gated filesystem verb

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a gated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Capability granted and the operation completed
    Success,
    /// Capability check refused the operation
    Denied,
    /// Capability granted but the operation failed
    Failed,
}

/// Audit event types
///
/// NIST 800-53: AU-2 (Audit Events)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    /// Connection established
    ConnectionEstablished {
        /// Session identifier
        session_id: String,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
    /// Connection closed
    ConnectionClosed {
        /// Session identifier
        session_id: String,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Authenticated username
        username: Option<String>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Session duration in seconds
        duration_secs: i64,
    },
    /// Authentication attempt
    AuthAttempt {
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Username attempted
        username: String,
        /// Backend that answered the attempt
        backend: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether authentication succeeded
        success: bool,
        /// Failure reason if applicable
        reason: Option<String>,
    },
    /// Gated filesystem verb
    Operation {
        /// Session identifier
        session_id: String,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Authenticated username
        username: Option<String>,
        /// Gateway verb (Get, Put, List, ...)
        verb: String,
        /// Requested path, as sent by the client
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Granted and completed, denied, or failed
        outcome: Outcome,
        /// Error message if denied or failed
        error: Option<String>,
    },
    /// Shell or exec request on an SFTP-only server
    NonSftpSession {
        /// Session identifier
        session_id: String,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Log the audit event
    ///
    /// NIST 800-53: AU-12 (Audit Generation)
    pub fn log(&self) {
        match self {
            Self::ConnectionEstablished {
                session_id,
                client_ip,
                ..
            } => {
                info!(
                    event = "connection_established",
                    session_id,
                    client_ip = ?client_ip,
                    "New connection established"
                );
            }
            Self::ConnectionClosed {
                session_id,
                username,
                duration_secs,
                ..
            } => {
                info!(
                    event = "connection_closed",
                    session_id,
                    username = ?username,
                    duration_secs,
                    "Connection closed"
                );
            }
            Self::AuthAttempt {
                client_ip,
                username,
                backend,
                success,
                reason,
                ..
            } => {
                if *success {
                    info!(
                        event = "auth_success",
                        username,
                        backend,
                        client_ip = ?client_ip,
                        "Authentication successful"
                    );
                } else {
                    warn!(
                        event = "auth_failure",
                        username,
                        backend,
                        client_ip = ?client_ip,
                        reason = ?reason,
                        "Authentication failed"
                    );
                }
            }
            Self::Operation {
                session_id,
                username,
                verb,
                path,
                outcome,
                error,
                ..
            } => match outcome {
                Outcome::Success => info!(
                    event = "operation",
                    session_id,
                    username = ?username,
                    verb,
                    path,
                    "Operation completed"
                ),
                Outcome::Denied => warn!(
                    event = "operation_denied",
                    session_id,
                    username = ?username,
                    verb,
                    path,
                    "Operation denied"
                ),
                Outcome::Failed => warn!(
                    event = "operation_failed",
                    session_id,
                    username = ?username,
                    verb,
                    path,
                    error = ?error,
                    "Operation failed"
                ),
            },
            Self::NonSftpSession {
                session_id,
                client_ip,
                ..
            } => {
                info!(
                    event = "non_sftp_session",
                    session_id,
                    client_ip = ?client_ip,
                    "Client attempted connection without sftp"
                );
            }
        }
    }

    /// Export as JSON
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which does not occur for these types.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-connection session information
///
/// NIST 800-53: AU-3 (Content of Audit Records)
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session identifier
    pub session_id: String,
    /// Client IP address
    pub client_ip: Option<IpAddr>,
    /// Authenticated username
    pub username: Option<String>,
    /// Session start time
    pub start_time: DateTime<Utc>,
}

impl SessionInfo {
    /// Start tracking a new connection
    pub fn new(client_ip: Option<IpAddr>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            client_ip,
            username: None,
            start_time: Utc::now(),
        }
    }

    /// Set username after authentication
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    /// Session duration in seconds
    pub fn duration_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.start_time)
            .num_seconds()
    }
}

/// Emits audit events when auditing is enabled
///
/// NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
#[derive(Debug, Clone, Copy)]
pub struct AuditLogger {
    enabled: bool,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AuditLogger {
    /// Create a logger; a disabled logger drops every event
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Record an event
    pub fn record(&self, event: &AuditEvent) {
        if self.enabled {
            event.log();
        }
    }

    /// Log the outcome of a gated verb
    pub fn operation(
        &self,
        session: &SessionInfo,
        verb: &str,
        path: &str,
        outcome: Outcome,
        error: Option<String>,
    ) {
        self.record(&AuditEvent::Operation {
            session_id: session.session_id.clone(),
            client_ip: session.client_ip,
            username: session.username.clone(),
            verb: verb.to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
            outcome,
            error,
        });
    }

    /// Log an authentication attempt
    pub fn auth_attempt(
        &self,
        client_ip: Option<IpAddr>,
        username: &str,
        backend: &str,
        reason: Option<String>,
    ) {
        self.record(&AuditEvent::AuthAttempt {
            client_ip,
            username: username.to_string(),
            backend: backend.to_string(),
            timestamp: Utc::now(),
            success: reason.is_none(),
            reason,
        });
    }
}
