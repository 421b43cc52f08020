//! Configuration loading tests
//!
//! NIST 800-53: CM-6 (Configuration Settings)

use rain_sftp::{Config, Error, LogFormat};
use std::collections::HashMap;
use tempfile::TempDir;

const CONFIG_TOML: &str = r#"
bind_address = "127.0.0.1"
port = 2022
host_keys = ["/etc/rain-sftp/ssh_host_ed25519_key"]
inactivity_timeout_secs = 60

[storage]
endpoint = "s3.internal:9000"
access_key = "gateway"
secret_key = "gateway-secret"
bucket = "transfers"
secure = false

[password_users.alice]
password = "$2b$04$abcdefghijklmnopqrstuu"
can_read = true
can_write = true

[logging]
level = "debug"
format = "text"
audit_enabled = false
"#;

fn write_config(contents: &str) -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rain-sftp.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path.to_string_lossy().into_owned())
}

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_load_toml_file() {
    let (_dir, path) = write_config(CONFIG_TOML);
    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.bind_address, "127.0.0.1");
    assert_eq!(config.port, 2022);
    assert_eq!(config.inactivity_timeout_secs, 60);
    assert_eq!(config.storage.endpoint_url(), "http://s3.internal:9000");
    assert_eq!(config.storage.region, "us-east-1");
    assert_eq!(config.logging.format, LogFormat::Text);
    assert!(!config.logging.audit_enabled);

    let users = config.password_users.as_ref().unwrap();
    assert!(users["alice"].can_write);
    assert!(config.validate().is_ok());
}

#[test]
fn test_environment_overrides_file() {
    let (_dir, path) = write_config(CONFIG_TOML);
    let mut config = Config::from_file(&path).unwrap();

    config
        .apply_env(lookup(&[
            ("S3_BUCKET", "other-bucket"),
            ("S3_SECURE", "true"),
            ("LDAP_ENDPOINT", "ldaps://directory.example.org"),
            ("LDAP_BASE_DN", "ou=people,dc=example,dc=org"),
            ("DEBUG", "1"),
        ]))
        .unwrap();

    assert_eq!(config.storage.bucket, "other-bucket");
    assert_eq!(config.storage.endpoint_url(), "https://s3.internal:9000");
    assert!(config.debug);

    let ldap = config.ldap.as_ref().unwrap();
    assert_eq!(ldap.endpoint, "ldaps://directory.example.org");
    assert_eq!(ldap.base_dn, "ou=people,dc=example,dc=org");
    assert!(ldap.bind_dn.is_empty());

    // Password users from the file are kept and still take precedence
    assert!(config.password_users.is_some());
}

#[test]
fn test_minimal_file_uses_defaults() {
    let (_dir, path) = write_config("");
    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.port, 8022);
    assert_eq!(config.bind_address, "0.0.0.0");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(config.logging.audit_enabled);
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_unreadable_or_malformed_file() {
    assert!(matches!(
        Config::from_file("/nonexistent/rain-sftp.toml"),
        Err(Error::Config(_))
    ));

    let (_dir, path) = write_config("port = \"not a number\"");
    assert!(matches!(Config::from_file(&path), Err(Error::Config(_))));
}

#[test]
fn test_validate_storage_and_host_keys() {
    let mut config = Config {
        password_users: Some(HashMap::new()),
        ..Config::default()
    };
    assert!(config.validate().is_err(), "host key required");

    config.host_keys_pem.push("inline".to_string());
    assert!(config.validate().is_err(), "endpoint required");

    config.storage.endpoint = "minio:9000".to_string();
    assert!(config.validate().is_err(), "bucket required");

    config.storage.bucket = "transfers".to_string();
    assert!(config.validate().is_ok());
}
