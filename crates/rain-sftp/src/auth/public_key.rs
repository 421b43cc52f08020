//! Public-key users from configuration
//!
//! NIST 800-53: IA-2 (Identification and Authentication), IA-5 (Authenticator Management)

use super::Capabilities;
use crate::config::PublicKeyUser;
use crate::{Error, Result};
use russh::keys::ssh_key::PublicKey;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct AuthorizedUser {
    key: PublicKey,
    capabilities: Capabilities,
}

/// Public-key backend: username -> one authorized key and capabilities
#[derive(Debug, Clone, Default)]
pub struct PublicKeyBackend {
    users: HashMap<String, AuthorizedUser>,
}

impl PublicKeyBackend {
    /// Parse the configured keys
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the user whose key does not parse.
    pub fn from_users(users: &HashMap<String, PublicKeyUser>) -> Result<Self> {
        let users = users
            .iter()
            .map(|(username, user)| {
                let key = PublicKey::from_openssh(user.public_key.trim()).map_err(|e| {
                    Error::Config(format!("invalid public key for user {username}: {e}"))
                })?;
                Ok((
                    username.clone(),
                    AuthorizedUser {
                        key,
                        capabilities: Capabilities {
                            can_read: user.can_read,
                            can_write: user.can_write,
                        },
                    },
                ))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { users })
    }

    /// Number of configured users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Check that `key` is the key configured for `username`
    ///
    /// Key material is compared; the comment is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] for an unknown user or another key.
    pub fn verify(&self, username: &str, key: &PublicKey) -> Result<Capabilities> {
        let Some(user) = self.users.get(username) else {
            return Err(Error::Authentication("unknown user".into()));
        };

        if user.key.key_data() != key.key_data() {
            debug!(username, algorithm = %key.algorithm(), "Presented key does not match");
            return Err(Error::Authentication("key mismatch".into()));
        }

        Ok(user.capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAYXwYntmmsHxqH8sHawCSOQa5AdWyEjyQJBjA/a4igY alice@laptop";
    const BOB_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIK1Yebe40EtB4CxaUAllCimEtLIMDZdZJFNio8gHsJJV bob@desk";

    fn backend() -> PublicKeyBackend {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            PublicKeyUser {
                public_key: ALICE_KEY.to_string(),
                can_read: true,
                can_write: true,
            },
        );
        PublicKeyBackend::from_users(&users).unwrap()
    }

    #[test]
    fn test_matching_key_ignores_comment() {
        let presented =
            PublicKey::from_openssh(ALICE_KEY.replace("alice@laptop", "other").as_str()).unwrap();
        let caps = backend().verify("alice", &presented).unwrap();
        assert!(caps.can_read && caps.can_write);
    }

    #[test]
    fn test_other_key_or_user_rejected() {
        let bob = PublicKey::from_openssh(BOB_KEY).unwrap();
        assert!(backend().verify("alice", &bob).is_err());

        let alice = PublicKey::from_openssh(ALICE_KEY).unwrap();
        assert!(backend().verify("bob", &alice).is_err());
    }

    #[test]
    fn test_unparseable_key_is_config_error() {
        let mut users = HashMap::new();
        users.insert(
            "carol".to_string(),
            PublicKeyUser {
                public_key: "ssh-ed25519 not-base64".to_string(),
                can_read: true,
                can_write: false,
            },
        );
        assert!(matches!(
            PublicKeyBackend::from_users(&users),
            Err(Error::Config(_))
        ));
    }
}
