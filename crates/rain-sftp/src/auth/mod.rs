//! Authentication and authorization
//!
//! NIST 800-53: AC-2 (Account Management), AC-3 (Access Enforcement),
//! IA-2 (Identification and Authentication)
//! STIG: V-222596 (Authorization enforcement)
//! Implementation: One credential backend (bcrypt users or an LDAP directory)
//! plus an optional public-key backend. A successful login yields the
//! session's [`Capabilities`]; nothing else about the identity is kept.

pub mod credential;
pub mod directory;
pub mod public_key;

pub use credential::CredentialBackend;
pub use directory::{
    DirectoryBackend, DirectoryConnection, DirectoryConnector, DirectoryEntry, LdapConnector,
};
pub use public_key::PublicKeyBackend;

use crate::audit::AuditLogger;
use crate::config::Config;
use crate::{Error, Result};
use russh::keys::ssh_key::PublicKey;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

/// Read and write permissions granted to a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Read and list verbs allowed
    pub can_read: bool,
    /// Write and structural verbs allowed
    pub can_write: bool,
}

/// Credentials presented for one login attempt
#[derive(Clone, Copy)]
pub enum Identity<'a> {
    /// Username and password
    Password {
        /// Login name
        username: &'a str,
        /// Supplied password
        password: &'a str,
    },
    /// Username and the public key offered by the client
    PublicKey {
        /// Login name
        username: &'a str,
        /// Offered key
        key: &'a PublicKey,
    },
}

impl Identity<'_> {
    /// Login name of the attempt
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::PublicKey { username, .. } => username,
        }
    }
}

impl std::fmt::Debug for Identity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::PublicKey { username, key } => f
                .debug_struct("PublicKey")
                .field("username", username)
                .field("algorithm", &key.algorithm())
                .finish(),
        }
    }
}

/// Configured authentication backend
#[derive(Debug, Clone)]
pub enum AuthBackend {
    /// bcrypt password users
    Credential(CredentialBackend),
    /// LDAP bind and group membership
    Directory(DirectoryBackend),
    /// Authorized public keys
    PublicKey(PublicKeyBackend),
}

impl AuthBackend {
    /// Short backend name used in logs and audit records
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential",
            Self::Directory(_) => "directory",
            Self::PublicKey(_) => "public_key",
        }
    }

    /// Verify an identity against this backend
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] on any failure, including an identity
    /// kind the backend does not handle.
    pub async fn authenticate(&self, identity: &Identity<'_>) -> Result<Capabilities> {
        match (self, identity) {
            (Self::Credential(backend), Identity::Password { username, password }) => {
                backend.verify(username, password).await
            }
            (Self::Directory(backend), Identity::Password { username, password }) => {
                backend.verify(username, password).await
            }
            (Self::PublicKey(backend), Identity::PublicKey { username, key }) => {
                backend.verify(username, key)
            }
            _ => Err(Error::Authentication(format!(
                "{} backend does not accept this method",
                self.name()
            ))),
        }
    }
}

/// Owns the configured backends and answers login attempts
///
/// NIST 800-53: IA-2 (Identification and Authentication), AU-2 (Audit Events)
#[derive(Debug, Clone)]
pub struct AuthCoordinator {
    password: AuthBackend,
    public_key: Option<AuthBackend>,
    audit: AuditLogger,
}

impl AuthCoordinator {
    /// Assemble a coordinator from already-built backends
    pub const fn new(
        password: AuthBackend,
        public_key: Option<AuthBackend>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            password,
            public_key,
            audit,
        }
    }

    /// Select backends from configuration, using `ldap3` for the directory
    ///
    /// # Errors
    ///
    /// See [`AuthCoordinator::from_config_with`].
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with(config, Arc::new(LdapConnector)).await
    }

    /// Select backends from configuration.
    ///
    /// Password users win over the directory when both are set. The directory
    /// backend is checked with one service bind before it is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no credential backend is configured, a
    /// public key does not parse, or the directory check fails.
    pub async fn from_config_with(
        config: &Config,
        connector: Arc<dyn DirectoryConnector>,
    ) -> Result<Self> {
        let audit = AuditLogger::new(config.logging.audit_enabled);

        let directory = config.ldap.as_ref().filter(|ldap| !ldap.endpoint.is_empty());
        let password = match (&config.password_users, directory) {
            (Some(users), directory) => {
                if directory.is_some() {
                    info!("Both password users and a directory are configured; using password users");
                }
                let backend = CredentialBackend::new(users.clone());
                info!(users = backend.user_count(), "Using credential authentication backend");
                AuthBackend::Credential(backend)
            }
            (None, Some(settings)) => {
                info!(endpoint = %settings.endpoint, "Using directory authentication backend");
                let backend = DirectoryBackend::new(settings.clone(), connector);
                backend.check().await?;
                AuthBackend::Directory(backend)
            }
            (None, None) => {
                return Err(Error::Config("no authentication mechanism provided".into()));
            }
        };

        let public_key = match &config.public_key_users {
            Some(users) => {
                let backend = PublicKeyBackend::from_users(users)?;
                info!(users = backend.user_count(), "Public key users found, adding public key backend");
                Some(AuthBackend::PublicKey(backend))
            }
            None => {
                info!("No public key users found, not using public key auth");
                None
            }
        };

        Ok(Self::new(password, public_key, audit))
    }

    /// Whether the `publickey` method should be offered
    pub const fn accepts_public_keys(&self) -> bool {
        self.public_key.is_some()
    }

    /// Name of the active credential backend
    pub const fn password_backend(&self) -> &'static str {
        self.password.name()
    }

    /// Authenticate one attempt and audit the result
    ///
    /// NIST 800-53: IA-2, AU-2
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] when the attempt fails.
    pub async fn authenticate(
        &self,
        identity: &Identity<'_>,
        client_ip: Option<IpAddr>,
    ) -> Result<Capabilities> {
        let backend = match identity {
            Identity::Password { .. } => &self.password,
            Identity::PublicKey { .. } => self
                .public_key
                .as_ref()
                .ok_or_else(|| Error::Authentication("public key login disabled".into()))?,
        };

        let result = backend.authenticate(identity).await;
        let reason = result.as_ref().err().map(ToString::to_string);
        self.audit
            .auth_attempt(client_ip, identity.username(), backend.name(), reason);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordUser;
    use std::collections::HashMap;

    fn config_with_alice() -> Config {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            PasswordUser {
                password: bcrypt::hash("secret123", 4).unwrap(),
                can_read: true,
                can_write: false,
            },
        );
        Config {
            password_users: Some(users),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_password_login() {
        let coordinator = AuthCoordinator::from_config(&config_with_alice()).await.unwrap();
        assert!(!coordinator.accepts_public_keys());
        assert_eq!(coordinator.password_backend(), "credential");

        let caps = coordinator
            .authenticate(
                &Identity::Password {
                    username: "alice",
                    password: "secret123",
                },
                None,
            )
            .await
            .unwrap();
        assert!(caps.can_read);
        assert!(!caps.can_write);
    }

    #[tokio::test]
    async fn test_public_key_rejected_without_backend() {
        let coordinator = AuthCoordinator::from_config(&config_with_alice()).await.unwrap();
        let key = PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAYXwYntmmsHxqH8sHawCSOQa5AdWyEjyQJBjA/a4igY",
        )
        .unwrap();
        let result = coordinator
            .authenticate(
                &Identity::PublicKey {
                    username: "alice",
                    key: &key,
                },
                None,
            )
            .await;
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[tokio::test]
    async fn test_no_credential_backend_is_fatal() {
        let result = AuthCoordinator::from_config(&Config::default()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
