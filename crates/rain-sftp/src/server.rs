//! SSH transport for the gateway
//!
//! This module accepts SSH connections (RFC 4251-4254), authenticates them
//! through the [`AuthCoordinator`] and serves the `sftp` subsystem on top of
//! the object store. Shell and exec requests get a one-line banner and are
//! closed.

use crate::audit::{AuditEvent, AuditLogger, SessionInfo};
use crate::auth::{AuthCoordinator, Capabilities, Identity};
use crate::config::Config;
use crate::gate::CapabilityGate;
use crate::namespace::BucketNamespace;
use crate::protocol::{PacketBuffer, frame};
use crate::sftp::SftpSession;
use crate::storage::ObjectStore;
use crate::{Error, Result};
use chrono::Utc;
use russh::keys::PrivateKey;
use russh::keys::ssh_key::PublicKey;
use russh::server::{Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Written to shell and exec sessions before they are closed
pub const BANNER: &str = "This server only supports SFTP.\n";

const SFTP_SUBSYSTEM: &str = "sftp";

/// SFTP gateway server
pub struct Server {
    bind_address: String,
    port: u16,
    ssh_config: russh::server::Config,
    coordinator: Arc<AuthCoordinator>,
    store: Arc<dyn ObjectStore>,
    audit: AuditLogger,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("host_keys", &self.ssh_config.keys.len())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a server from validated configuration
    ///
    /// NIST 800-53: IA-5 (Authenticator Management), AC-12 (Session Termination)
    /// Implementation: Every configured host key is loaded up front; a key that
    /// does not parse stops startup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no host key is configured or a host key
    /// cannot be loaded.
    pub fn new(
        config: &Config,
        coordinator: AuthCoordinator,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let keys = load_host_keys(config)?;
        info!(key_count = keys.len(), "Loaded host keys");

        let ssh_config = russh::server::Config {
            keys,
            methods: allowed_methods(&coordinator),
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            inactivity_timeout: (config.inactivity_timeout_secs > 0)
                .then(|| Duration::from_secs(config.inactivity_timeout_secs)),
            ..Default::default()
        };

        Ok(Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            ssh_config,
            coordinator: Arc::new(coordinator),
            store,
            audit: AuditLogger::new(config.logging.audit_enabled),
        })
    }

    /// Listen on the configured address and serve until the listener fails
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the address cannot be bound and
    /// [`Error::Ssh`] if the accept loop stops.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        let socket = TcpListener::bind(&addr).await?;
        info!(
            event = "server_listening",
            local_addr = ?socket.local_addr(),
            "SFTP gateway listening"
        );

        let mut runner = GatewayRunner {
            coordinator: self.coordinator,
            store: self.store,
            audit: self.audit,
        };
        runner
            .run_on_socket(Arc::new(self.ssh_config), &socket)
            .await
            .map_err(|e| Error::Ssh(format!("Server error: {e}")))
    }
}

/// Methods advertised to clients: password always, publickey when configured
fn allowed_methods(coordinator: &AuthCoordinator) -> MethodSet {
    let mut methods = MethodSet::empty();
    methods.push(MethodKind::Password);
    if coordinator.accepts_public_keys() {
        methods.push(MethodKind::PublicKey);
    }
    methods
}

/// Load host keys from files and inline PEM blocks
///
/// NIST 800-53: IA-5 (Authenticator Management)
///
/// # Errors
///
/// Returns [`Error::Config`] naming the key that failed.
pub fn load_host_keys(config: &Config) -> Result<Vec<PrivateKey>> {
    let mut keys = Vec::with_capacity(config.host_keys.len() + config.host_keys_pem.len());

    for path in &config.host_keys {
        debug!(path = %path.display(), "Loading host key");
        let key = russh::keys::load_secret_key(path, None).map_err(|e| {
            Error::Config(format!("failed to load host key {}: {e}", path.display()))
        })?;
        keys.push(key);
    }

    for (index, pem) in config.host_keys_pem.iter().enumerate() {
        let key = russh::keys::decode_secret_key(pem.trim(), None)
            .map_err(|e| Error::Config(format!("failed to decode inline host key #{index}: {e}")))?;
        keys.push(key);
    }

    if keys.is_empty() {
        return Err(Error::Config("no host keys configured".into()));
    }
    Ok(keys)
}

/// Creates one handler per accepted connection
#[derive(Clone)]
struct GatewayRunner {
    coordinator: Arc<AuthCoordinator>,
    store: Arc<dyn ObjectStore>,
    audit: AuditLogger,
}

impl russh::server::Server for GatewayRunner {
    type Handler = GatewayHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        GatewayHandler::new(
            peer_addr.map(|addr| addr.ip()),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.store),
            self.audit,
        )
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        if error.is_security_event() {
            warn!(event = "session_error", error = %error, "Session ended with a security event");
        } else {
            debug!(error = %error, "Session error");
        }
    }
}

/// SFTP state for one channel: the reassembly buffer and the dispatcher
struct SftpChannel {
    packets: PacketBuffer,
    sftp: SftpSession,
}

/// Per-connection handler
///
/// NIST 800-53: IA-2 (Identification and Authentication), AC-3 (Access Enforcement),
/// AC-12 (Session Termination), AU-2 (Audit Events)
/// STIG: V-222601 (Session termination)
/// Implementation: Capabilities are fixed at login and handed to every SFTP
/// channel's gate. Staged writes still open when a channel or the connection
/// goes away are discarded.
struct GatewayHandler {
    session: SessionInfo,
    coordinator: Arc<AuthCoordinator>,
    store: Arc<dyn ObjectStore>,
    audit: AuditLogger,
    capabilities: Option<Capabilities>,
    channels: HashMap<ChannelId, SftpChannel>,
}

impl GatewayHandler {
    fn new(
        client_ip: Option<IpAddr>,
        coordinator: Arc<AuthCoordinator>,
        store: Arc<dyn ObjectStore>,
        audit: AuditLogger,
    ) -> Self {
        let session = SessionInfo::new(client_ip);
        info!(session_id = %session.session_id, client_ip = ?client_ip, "New client connection");
        audit.record(&AuditEvent::ConnectionEstablished {
            session_id: session.session_id.clone(),
            client_ip,
            timestamp: Utc::now(),
        });

        Self {
            session,
            coordinator,
            store,
            audit,
            capabilities: None,
            channels: HashMap::new(),
        }
    }

    async fn authenticate(&mut self, identity: Identity<'_>) -> Auth {
        let client_ip = self.session.client_ip;
        match self.coordinator.authenticate(&identity, client_ip).await {
            Ok(capabilities) => {
                info!(
                    session_id = %self.session.session_id,
                    username = identity.username(),
                    can_read = capabilities.can_read,
                    can_write = capabilities.can_write,
                    "Authenticated"
                );
                self.session.set_username(identity.username());
                self.capabilities = Some(capabilities);
                Auth::Accept
            }
            Err(e) => {
                debug!(username = identity.username(), error = %e, "Authentication rejected");
                Auth::Reject {
                    proceed_with_methods: Some(allowed_methods(&self.coordinator)),
                    partial_success: false,
                }
            }
        }
    }

    /// Answer a shell or exec request with the banner and close the channel
    fn refuse_terminal(&self, channel: ChannelId, session: &mut Session) {
        info!(
            session_id = %self.session.session_id,
            client_ip = ?self.session.client_ip,
            "Client attempted connection without SFTP"
        );
        self.audit.record(&AuditEvent::NonSftpSession {
            session_id: self.session.session_id.clone(),
            client_ip: self.session.client_ip,
            timestamp: Utc::now(),
        });

        let _ = session.channel_success(channel);
        let _ = session.data(channel, CryptoVec::from_slice(BANNER.as_bytes()));
        let _ = session.exit_status_request(channel, 0);
        let _ = session.eof(channel);
        let _ = session.close(channel);
    }

    fn drop_channel(&mut self, channel: ChannelId) {
        if let Some(state) = self.channels.remove(&channel) {
            debug!(
                session_id = %self.session.session_id,
                open_handles = state.sftp.open_handles(),
                "SFTP channel finished"
            );
        }
    }
}

impl Drop for GatewayHandler {
    fn drop(&mut self) {
        info!(
            session_id = %self.session.session_id,
            duration_secs = self.session.duration_secs(),
            "Session ended"
        );
        self.audit.record(&AuditEvent::ConnectionClosed {
            session_id: self.session.session_id.clone(),
            client_ip: self.session.client_ip,
            username: self.session.username.clone(),
            timestamp: Utc::now(),
            duration_secs: self.session.duration_secs(),
        });
    }
}

impl russh::server::Handler for GatewayHandler {
    type Error = Error;

    /// NIST 800-53: IA-2 (Identification and Authentication)
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        Ok(self
            .authenticate(Identity::Password {
                username: user,
                password,
            })
            .await)
    }

    /// NIST 800-53: IA-2 (Identification and Authentication)
    /// STIG: V-222578 (Replay-resistant authentication)
    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        if !self.coordinator.accepts_public_keys() {
            return Ok(Auth::Reject {
                proceed_with_methods: Some(allowed_methods(&self.coordinator)),
                partial_success: false,
            });
        }
        Ok(self
            .authenticate(Identity::PublicKey {
                username: user,
                key: public_key,
            })
            .await)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        trace!(channel = ?channel.id(), "Session channel opened");
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<()> {
        debug!(subsystem = %name, "Subsystem request");

        let capabilities = match (name, self.capabilities) {
            (SFTP_SUBSYSTEM, Some(capabilities)) => capabilities,
            (SFTP_SUBSYSTEM, None) => {
                error!("SFTP subsystem requested before authentication");
                let _ = session.channel_failure(channel);
                return Ok(());
            }
            _ => {
                warn!(subsystem = %name, "Unsupported subsystem");
                let _ = session.channel_failure(channel);
                return Ok(());
            }
        };

        let gate = CapabilityGate::new(
            capabilities,
            BucketNamespace::new(Arc::clone(&self.store)),
            self.session.clone(),
            self.audit,
        );
        self.channels.insert(
            channel,
            SftpChannel {
                packets: PacketBuffer::new(),
                sftp: SftpSession::new(gate),
            },
        );
        info!(session_id = %self.session.session_id, "SFTP subsystem started");
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        self.refuse_terminal(channel, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        self.refuse_terminal(channel, session);
        Ok(())
    }

    /// Reassemble SFTP packets and answer each one in order
    ///
    /// NIST 800-53: SI-10 (Information Input Validation), SI-11 (Error Handling)
    /// STIG: V-222566
    /// Implementation: A packet that cannot be decoded ends the connection.
    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<()> {
        let Some(state) = self.channels.get_mut(&channel) else {
            trace!(bytes = data.len(), "Ignoring data on a non-SFTP channel");
            return Ok(());
        };

        state.packets.extend(data);
        loop {
            let packet = match state.packets.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    warn!(session_id = %self.session.session_id, error = %e, "Malformed SFTP stream");
                    return Err(e);
                }
            };

            let reply = state.sftp.handle_packet(&packet).await.inspect_err(|e| {
                warn!(session_id = %self.session.session_id, error = %e, "SFTP protocol violation");
            })?;

            if session
                .data(channel, CryptoVec::from_slice(&frame(&reply)))
                .is_err()
            {
                return Err(Error::channel_closed("failed to send SFTP reply"));
            }
        }
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        self.drop_channel(channel);
        let _ = session.close(channel);
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        self.drop_channel(channel);
        Ok(())
    }
}
