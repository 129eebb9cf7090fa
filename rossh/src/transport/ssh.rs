//! SSH transport implementation using russh.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info, warn};
use russh::client::{self, Handle};
use russh::keys::ssh_key::HashAlg;
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{ChannelMsg, Disconnect, Preferred};
use russh_sftp::client::SftpSession;
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;

use super::config::{AuthMethod, SshConfig};
use super::output::ExecOutput;
use super::{Connection, Connector};
use crate::error::{ConnectFailure, Result, SessionError, TransportError};
use crate::hostkey::{HostKey, KeyType};

/// Connector producing russh-backed [`SshTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    type Connection = SshTransport;

    async fn connect(&self, config: &SshConfig, trusted_key: &HostKey) -> Result<SshTransport> {
        SshTransport::connect(config, trusted_key).await
    }
}

/// SSH transport wrapping a russh client handle.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// `host:port`, for logs.
    peer: String,

    /// Bound on each command and transfer.
    timeout: Duration,
}

/// russh client configuration restricted to the host key algorithms we can
/// verify.
pub(crate) fn client_config() -> client::Config {
    client::Config {
        preferred: Preferred {
            key: Cow::Owned(KeyType::negotiable_algorithms()),
            ..Preferred::default()
        },
        ..Default::default()
    }
}

fn connection_failed(config: &SshConfig, reason: ConnectFailure) -> crate::Error {
    SessionError::ConnectionFailed {
        host: config.host.clone(),
        port: config.port,
        reason,
    }
    .into()
}

async fn bounded<T>(
    timeout: Duration,
    operation: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

fn sftp_error(e: russh_sftp::client::error::Error) -> crate::Error {
    TransportError::Sftp(e.to_string()).into()
}

impl SshTransport {
    /// Connect, verify the server presents `trusted_key`, and authenticate.
    ///
    /// The server key is checked before any credentials are sent; a
    /// mismatch aborts the handshake.
    pub async fn connect(config: &SshConfig, trusted_key: &HostKey) -> Result<Self> {
        let trusted = trusted_key.to_public_key()?;
        let rejection: Arc<Mutex<Option<ConnectFailure>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            trusted,
            rejection: rejection.clone(),
        };

        debug!(
            "Connecting to {} expecting {} key {}",
            config.socket_addr(),
            trusted_key.key_type(),
            trusted_key.fingerprint()
        );

        // Connect to the server
        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(
                Arc::new(client_config()),
                (config.host.as_str(), config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            // Prefer the detailed host key rejection over the generic
            // russh::Error::UnknownKey
            let reason = rejection
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or(ConnectFailure::Handshake(e));
            connection_failed(config, reason)
        })?;

        // Authenticate
        let authenticated =
            bounded(config.timeout, Self::authenticate(&mut session, config)).await;
        if let Err(e) = authenticated {
            let _ = session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(e);
        }

        info!(
            "Opened SSH session to {} as '{}' ({})",
            config.socket_addr(),
            config.username,
            config.auth.name()
        );

        Ok(Self {
            session,
            peer: config.socket_addr(),
            timeout: config.timeout,
        })
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let handshake = |e| connection_failed(config, ConnectFailure::Handshake(e));

        let success = match &config.auth {
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(handshake)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| connection_failed(config, ConnectFailure::Key(e.to_string())))?;

                // Get the best RSA hash algorithm supported by the server
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(handshake)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(handshake)?
                    .success()
            }
        };

        if !success {
            return Err(connection_failed(
                config,
                ConnectFailure::AuthenticationRejected {
                    user: config.username.clone(),
                },
            ));
        }

        Ok(())
    }

    /// Run a command on a new exec channel, collecting both streams until
    /// the server closes the channel.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput> {
        bounded(self.timeout, async {
            let mut channel = self
                .session
                .channel_open_session()
                .await
                .map_err(TransportError::Ssh)?;
            channel
                .exec(true, command)
                .await
                .map_err(TransportError::Ssh)?;

            let mut stdout = BytesMut::new();
            let mut stderr = BytesMut::new();
            let mut exit_status = None;

            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                    ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                    ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                    ChannelMsg::Close => break,
                    _ => {}
                }
            }

            debug!(
                "{}: '{}' exited with {:?} ({} bytes stdout, {} bytes stderr)",
                self.peer,
                command,
                exit_status,
                stdout.len(),
                stderr.len()
            );

            Ok::<_, crate::Error>(ExecOutput::new(
                stdout.freeze(),
                stderr.freeze(),
                exit_status,
            ))
        })
        .await
    }

    /// Open an SFTP sub-channel. Callers close it when done.
    async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(TransportError::Ssh)?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(sftp_error)
    }

    async fn close_sftp(&self, sftp: SftpSession) {
        if let Err(e) = sftp.close().await {
            debug!("{}: closing SFTP sub-channel failed: {}", self.peer, e);
        }
    }

    /// Write `data` to `path`, replacing any existing file.
    pub async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        bounded(self.timeout, async {
            let sftp = self.open_sftp().await?;
            let written = async {
                let mut file = sftp.create(path).await.map_err(sftp_error)?;
                file.write_all(data).await.map_err(TransportError::Io)?;
                file.flush().await.map_err(TransportError::Io)?;
                file.shutdown().await.map_err(TransportError::Io)?;
                Ok::<(), crate::Error>(())
            }
            .await;
            self.close_sftp(sftp).await;

            if written.is_ok() {
                debug!("{}: wrote {} bytes to {}", self.peer, data.len(), path);
            }
            written
        })
        .await
    }

    /// Read the whole of `path`.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        bounded(self.timeout, async {
            let sftp = self.open_sftp().await?;
            let data = sftp.read(path).await.map_err(sftp_error);
            self.close_sftp(sftp).await;
            data
        })
        .await
    }

    /// List the entry names in directory `path`.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        bounded(self.timeout, async {
            let sftp = self.open_sftp().await?;
            let entries = sftp.read_dir(path).await.map_err(sftp_error).map(|dir| {
                dir.map(|entry| entry.file_name())
                    .filter(|name| name != "." && name != "..")
                    .collect::<Vec<_>>()
            });
            self.close_sftp(sftp).await;
            entries
        })
        .await
    }

    /// Close the connection.
    pub async fn disconnect(self) -> Result<()> {
        self.session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        info!("Closed SSH session to {}", self.peer);
        Ok(())
    }
}

impl Connection for SshTransport {
    async fn execute(&mut self, command: &str) -> Result<ExecOutput> {
        self.exec(command).await
    }

    async fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.upload(path, data).await
    }

    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.download(path).await
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        self.read_dir(path).await
    }

    async fn close(self) -> Result<()> {
        self.disconnect().await
    }
}

/// Compare the key a server offered with the single key we trust.
fn verify_server_key(
    trusted: &PublicKey,
    offered: &PublicKey,
) -> std::result::Result<(), ConnectFailure> {
    if offered.key_data() == trusted.key_data() {
        return Ok(());
    }
    Err(ConnectFailure::HostKeyMismatch {
        expected: trusted.fingerprint(HashAlg::Sha256).to_string(),
        actual: offered.fingerprint(HashAlg::Sha256).to_string(),
    })
}

/// SSH client handler for russh.
struct SshHandler {
    trusted: PublicKey,
    /// Stores the mismatch detail so connect() can surface it instead of
    /// the generic russh::Error::UnknownKey.
    rejection: Arc<Mutex<Option<ConnectFailure>>>,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match verify_server_key(&self.trusted, server_public_key) {
            Ok(()) => Ok(true),
            Err(failure) => {
                warn!("Rejecting server: {}", failure);
                *self
                    .rejection
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(failure);
                Ok(false)
            }
        }
    }
}
