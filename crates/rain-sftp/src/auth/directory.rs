//! Directory-service (LDAP) authentication
//!
//! NIST 800-53: IA-2 (Identification and Authentication), AC-2 (Account Management)
//! Implementation: Search as the service account, bind as the user to verify the
//! password, then map `memberOf` onto read and write capabilities.

use super::Capabilities;
use crate::config::DirectoryConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry, ldap_escape};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A user entry found by the people search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry
    pub dn: String,
    /// Values of the `memberOf` attribute
    pub member_of: Vec<String>,
}

/// Opens service-bound directory connections
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Dial the endpoint (StartTLS unless `ldaps`) and bind with the service
    /// credentials
    async fn connect(&self, settings: &DirectoryConfig) -> Result<Box<dyn DirectoryConnection>>;
}

/// An open directory connection
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind as `dn`
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// Subtree search under `base_dn` for the person with `uid`
    async fn search_people(&mut self, base_dn: &str, uid: &str) -> Result<Vec<DirectoryEntry>>;

    /// Unbind and drop the connection
    async fn close(self: Box<Self>);
}

/// Search filter for the person entry of `username`
pub fn people_filter(username: &str) -> String {
    format!(
        "(&(objectClass=organizationalPerson)(uid={}))",
        ldap_escape(username)
    )
}

/// Directory-service backend
#[derive(Clone)]
pub struct DirectoryBackend {
    settings: DirectoryConfig,
    connector: Arc<dyn DirectoryConnector>,
}

impl std::fmt::Debug for DirectoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryBackend")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DirectoryBackend {
    /// Create a backend using `connector` for every connection
    pub fn new(settings: DirectoryConfig, connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    /// Dial and bind once with the service credentials
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the directory cannot be reached or the
    /// service bind fails.
    pub async fn check(&self) -> Result<()> {
        info!(
            endpoint = %self.settings.endpoint,
            base_dn = %self.settings.base_dn,
            read_group = %self.settings.read_group,
            write_group = %self.settings.write_group,
            "Testing directory credentials"
        );

        let connection = self
            .connector
            .connect(&self.settings)
            .await
            .map_err(|e| Error::Config(format!("directory service check failed: {e}")))?;
        connection.close().await;

        info!("Directory credentials verified");
        Ok(())
    }

    /// Verify `password` for `username` and derive capabilities from group
    /// membership
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] when the user is unknown, ambiguous,
    /// the password is wrong or empty, or the directory is unreachable.
    pub async fn verify(&self, username: &str, password: &str) -> Result<Capabilities> {
        // An empty simple bind is an anonymous bind
        if password.is_empty() {
            return Err(Error::Authentication("empty password".into()));
        }

        let mut connection = self.connector.connect(&self.settings).await.map_err(|e| {
            error!(username, error = %e, "Cannot authenticate: directory unavailable");
            Error::Authentication("directory unavailable".into())
        })?;

        let result = self.verify_on(connection.as_mut(), username, password).await;
        connection.close().await;
        result
    }

    async fn verify_on(
        &self,
        connection: &mut dyn DirectoryConnection,
        username: &str,
        password: &str,
    ) -> Result<Capabilities> {
        let entries = connection
            .search_people(&self.settings.base_dn, username)
            .await
            .map_err(|e| {
                error!(username, error = %e, "Failed to search directory");
                Error::Authentication("directory search failed".into())
            })?;

        let entry = match entries.as_slice() {
            [] => {
                info!(username, "Username not found in directory");
                return Err(Error::Authentication("unknown user".into()));
            }
            [entry] => entry,
            _ => {
                warn!(
                    event = "directory_anomaly",
                    username,
                    entry_count = entries.len(),
                    "Directory returned more than one entry"
                );
                return Err(Error::Authentication("ambiguous user".into()));
            }
        };

        connection.bind(&entry.dn, password).await.map_err(|e| {
            debug!(username, error = %e, "User bind failed");
            Error::Authentication("password mismatch".into())
        })?;

        Ok(Capabilities {
            can_read: entry.member_of.iter().any(|g| *g == self.settings.read_group),
            can_write: entry.member_of.iter().any(|g| *g == self.settings.write_group),
        })
    }
}

/// `ldap3` connector
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self, settings: &DirectoryConfig) -> Result<Box<dyn DirectoryConnection>> {
        let endpoint = url::Url::parse(&settings.endpoint)
            .map_err(|e| Error::Config(format!("invalid directory endpoint: {e}")))?;
        let conn_settings = LdapConnSettings::new().set_starttls(endpoint.scheme() != "ldaps");

        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &settings.endpoint)
            .await
            .map_err(directory_error)?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "Directory connection error");
            }
        });

        ldap.simple_bind(&settings.bind_dn, &settings.bind_password)
            .await
            .and_then(ldap3::LdapResult::success)
            .map_err(directory_error)?;

        Ok(Box::new(LdapConnection { ldap }))
    }
}

struct LdapConnection {
    ldap: ldap3::Ldap,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.ldap
            .simple_bind(dn, password)
            .await
            .and_then(ldap3::LdapResult::success)
            .map_err(directory_error)?;
        Ok(())
    }

    async fn search_people(&mut self, base_dn: &str, uid: &str) -> Result<Vec<DirectoryEntry>> {
        let (entries, _) = self
            .ldap
            .search(base_dn, Scope::Subtree, &people_filter(uid), vec!["memberOf"])
            .await
            .and_then(ldap3::SearchResult::success)
            .map_err(directory_error)?;

        Ok(entries
            .into_iter()
            .map(|raw| {
                let mut entry = SearchEntry::construct(raw);
                DirectoryEntry {
                    dn: entry.dn,
                    member_of: entry.attrs.remove("memberOf").unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn close(self: Box<Self>) {
        let mut ldap = self.ldap;
        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "Directory unbind failed");
        }
    }
}

fn directory_error(err: ldap3::LdapError) -> Error {
    Error::Authentication(format!("directory error: {err}"))
}
