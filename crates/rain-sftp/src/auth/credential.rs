//! Password users from configuration, verified with bcrypt
//!
//! NIST 800-53: IA-5 (Authenticator Management)

use super::Capabilities;
use crate::config::PasswordUser;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::warn;

/// Credential backend: username -> bcrypt hash and capabilities
#[derive(Debug, Clone, Default)]
pub struct CredentialBackend {
    users: HashMap<String, PasswordUser>,
}

impl CredentialBackend {
    /// Build from the configured user map
    pub const fn new(users: HashMap<String, PasswordUser>) -> Self {
        Self { users }
    }

    /// Number of configured users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Check `password` against the stored hash for `username`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] for an unknown user, a wrong
    /// password, or a stored hash bcrypt cannot parse.
    pub async fn verify(&self, username: &str, password: &str) -> Result<Capabilities> {
        let Some(user) = self.users.get(username) else {
            return Err(Error::Authentication("unknown user".into()));
        };

        let hash = user.password.clone();
        let candidate = password.to_string();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
            .await
            .map_err(|e| Error::Other(format!("password verification task failed: {e}")))?;

        match verified {
            Ok(true) => Ok(Capabilities {
                can_read: user.can_read,
                can_write: user.can_write,
            }),
            Ok(false) => Err(Error::Authentication("password mismatch".into())),
            Err(e) => {
                warn!(username, error = %e, "Stored password hash could not be verified");
                Err(Error::Authentication("unusable password hash".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CredentialBackend {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            PasswordUser {
                password: bcrypt::hash("secret123", 4).unwrap(),
                can_read: true,
                can_write: false,
            },
        );
        users.insert(
            "mallory".to_string(),
            PasswordUser {
                password: "not-a-bcrypt-hash".to_string(),
                can_read: true,
                can_write: true,
            },
        );
        CredentialBackend::new(users)
    }

    #[tokio::test]
    async fn test_correct_password_grants_configured_capabilities() {
        let caps = backend().verify("alice", "secret123").await.unwrap();
        assert_eq!(
            caps,
            Capabilities {
                can_read: true,
                can_write: false
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_fail() {
        let backend = backend();
        assert!(matches!(
            backend.verify("alice", "wrong").await,
            Err(Error::Authentication(_))
        ));
        assert!(matches!(
            backend.verify("bob", "secret123").await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_hash_fails() {
        assert!(matches!(
            backend().verify("mallory", "anything").await,
            Err(Error::Authentication(_))
        ));
    }
}
