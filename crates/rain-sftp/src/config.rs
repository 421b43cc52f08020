//! Gateway configuration
//!
//! Settings come from an optional TOML file, then environment variables, then
//! command-line flags. Every error here is fatal at startup.
//!
//! NIST 800-53: CM-6 (Configuration Settings)

use crate::{Error, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Trace-level, human-readable logs
    #[serde(default)]
    pub debug: bool,

    /// Host private key files
    #[serde(default)]
    pub host_keys: Vec<PathBuf>,

    /// Inline host private keys (OpenSSH or PEM text)
    #[serde(default)]
    pub host_keys_pem: Vec<String>,

    /// Object storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential backend users, keyed by username
    #[serde(default)]
    pub password_users: Option<HashMap<String, PasswordUser>>,

    /// Directory-service backend
    #[serde(default)]
    pub ldap: Option<DirectoryConfig>,

    /// Public-key backend users, keyed by username
    #[serde(default)]
    pub public_key_users: Option<HashMap<String, PublicKeyUser>>,

    /// Idle session timeout in seconds
    ///
    /// NIST 800-53: AC-12 (Session Termination)
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Object storage connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Host and port, or a full URL
    pub endpoint: String,
    /// Access key id
    pub access_key: String,
    /// Secret access key
    pub secret_key: String,
    /// Bucket holding every object the gateway serves
    pub bucket: String,
    /// Use HTTPS when the endpoint carries no scheme
    pub secure: bool,
    /// Signing region
    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            secure: true,
            region: "us-east-1".to_string(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("secure", &self.secure)
            .field("region", &self.region)
            .finish()
    }
}

impl StorageConfig {
    /// Endpoint as a URL, adding a scheme from `secure` when none is given
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.secure {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

/// Credential backend entry
#[derive(Clone, Serialize, Deserialize)]
pub struct PasswordUser {
    /// bcrypt hash of the user's password
    #[serde(alias = "Password")]
    pub password: String,
    /// Grants read and list verbs
    #[serde(alias = "CanRead", default)]
    pub can_read: bool,
    /// Grants write and structural verbs
    #[serde(alias = "CanWrite", default)]
    pub can_write: bool,
}

impl std::fmt::Debug for PasswordUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordUser")
            .field("password", &"<redacted>")
            .field("can_read", &self.can_read)
            .field("can_write", &self.can_write)
            .finish()
    }
}

/// Public-key backend entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyUser {
    /// Authorized key in OpenSSH format (`ssh-ed25519 AAAA... comment`)
    #[serde(alias = "PublicKey")]
    pub public_key: String,
    /// Grants read and list verbs
    #[serde(alias = "CanRead", default)]
    pub can_read: bool,
    /// Grants write and structural verbs
    #[serde(alias = "CanWrite", default)]
    pub can_write: bool,
}

/// Directory-service (LDAP) backend settings
///
/// NIST 800-53: IA-2 (Identification and Authentication), AC-2 (Account Management)
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// `ldap://` or `ldaps://` URL
    pub endpoint: String,
    /// Service account DN used for searches
    #[serde(default)]
    pub bind_dn: String,
    /// Service account password
    #[serde(default)]
    pub bind_password: String,
    /// Search base for user entries
    #[serde(default)]
    pub base_dn: String,
    /// Group DN granting read access
    #[serde(default)]
    pub read_group: String,
    /// Group DN granting write access
    #[serde(default)]
    pub write_group: String,
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("endpoint", &self.endpoint)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("base_dn", &self.base_dn)
            .field("read_group", &self.read_group)
            .field("write_group", &self.write_group)
            .finish()
    }
}

/// Logging configuration
///
/// NIST 800-53: AU-2 (Audit Events), AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
/// STIG: V-222648 (Audit Records)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stdout if not specified)
    pub file: Option<PathBuf>,
    /// Emit audit events for authentication and gateway operations
    pub audit_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            file: None,
            audit_enabled: true,
        }
    }
}

/// Log format options
///
/// NIST 800-53: AU-9 (Protection of Audit Information)
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            debug: false,
            host_keys: Vec::new(),
            host_keys_pem: Vec::new(),
            storage: StorageConfig::default(),
            password_users: None,
            ldap: None,
            public_key_users: None,
            inactivity_timeout_secs: default_inactivity_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// Empty values count as unset. Pass `|k| std::env::var(k).ok()` for the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed booleans or user maps.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(value) = get("DEBUG") {
            self.debug = parse_bool("DEBUG", &value)?;
        }

        if let Some(value) = get("JSON_USERS") {
            let users = serde_json::from_str(&value)
                .map_err(|e| Error::Config(format!("Failed to parse JSON_USERS: {e}")))?;
            self.password_users = Some(users);
        }

        if let Some(value) = get("PUBLIC_KEY_USERS") {
            let users = serde_json::from_str(&value)
                .map_err(|e| Error::Config(format!("Failed to parse PUBLIC_KEY_USERS: {e}")))?;
            self.public_key_users = Some(users);
        }

        if let Some(endpoint) = get("LDAP_ENDPOINT") {
            let current = self.ldap.take();
            let field = |key: &str, fallback: Option<&String>| {
                get(key).or_else(|| fallback.cloned()).unwrap_or_default()
            };
            self.ldap = Some(DirectoryConfig {
                endpoint,
                bind_dn: field("LDAP_USERNAME", current.as_ref().map(|c| &c.bind_dn)),
                bind_password: field("LDAP_PASSWORD", current.as_ref().map(|c| &c.bind_password)),
                base_dn: field("LDAP_BASE_DN", current.as_ref().map(|c| &c.base_dn)),
                read_group: field("LDAP_READ_GROUP", current.as_ref().map(|c| &c.read_group)),
                write_group: field("LDAP_WRITE_GROUP", current.as_ref().map(|c| &c.write_group)),
            });
        }

        if let Some(value) = get("S3_ENDPOINT") {
            self.storage.endpoint = value;
        }
        if let Some(value) = get("S3_ACCESS_KEY") {
            self.storage.access_key = value;
        }
        if let Some(value) = get("S3_SECRET") {
            self.storage.secret_key = value;
        }
        if let Some(value) = get("S3_BUCKET") {
            self.storage.bucket = value;
        }
        if let Some(value) = get("S3_REGION") {
            self.storage.region = value;
        }
        if let Some(value) = get("S3_SECURE") {
            self.storage.secure = parse_bool("S3_SECURE", &value)?;
        }

        if let Some(value) = get("HOST_KEYS") {
            self.host_keys_pem.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string),
            );
        }

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no credential backend or host key is
    /// configured, or the storage settings are incomplete.
    pub fn validate(&self) -> Result<()> {
        let has_passwords = self.password_users.is_some();
        let has_directory = self.ldap.as_ref().is_some_and(|ldap| !ldap.endpoint.is_empty());
        if !has_passwords && !has_directory {
            return Err(Error::Config(
                "no authentication mechanism provided (set JSON_USERS or LDAP_ENDPOINT)".to_string(),
            ));
        }

        if self.host_keys.is_empty() && self.host_keys_pem.is_empty() {
            return Err(Error::Config("at least one host key is required".to_string()));
        }

        if self.storage.endpoint.is_empty() {
            return Err(Error::Config("storage endpoint is required".to_string()));
        }

        if self.storage.bucket.is_empty() {
            return Err(Error::Config("storage bucket is required".to_string()));
        }

        Ok(())
    }
}

/// Parse a boolean the way `strconv.ParseBool`-style settings expect
///
/// # Errors
///
/// Returns [`Error::Config`] naming `name` for any other spelling.
pub fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} has invalid value (must be \"true\" or \"false\")"
        ))),
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8022
}

// NIST 800-53: AC-12 (Session Termination)
const fn default_inactivity_timeout() -> u64 {
    300
}
