//! Reference-counted SSH sessions.
//!
//! An [`SshSession`] owns at most one physical connection. Every
//! [`acquire`](SshSession::acquire) must be matched by a
//! [`release`](SshSession::release); the connection is opened on the first
//! acquire and closed on the last release, so a session can be handed to
//! nested helpers that each acquire and release it independently.
//!
//! [`enter`](SshSession::enter) wraps the pair in a [`SessionGuard`] that
//! is released explicitly with [`SessionGuard::exit`] and still balances
//! the count if it is dropped early.
//!
//! # Example
//!
//! ```rust,no_run
//! use rossh::SessionBuilder;
//!
//! # async fn example() -> Result<(), rossh::Error> {
//! let mut session = SessionBuilder::new("192.168.88.1")
//!     .username("admin")
//!     .password("secret")
//!     .host_key("ecdsa-sha2-nistp256 AAAAE2VjZHNh...")
//!     .build()?;
//!
//! let mut guard = session.enter().await?;
//! let identity = guard.run("/system identity print").await?;
//! guard.exit().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod guard;

pub use builder::SessionBuilder;
pub use guard::SessionGuard;

use std::sync::Arc;

use log::{debug, warn};

use crate::error::{Result, SessionError};
use crate::hostkey::{HostKey, HostKeyStore};
use crate::transport::{Connection, Connector, ExecOutput, SshConfig, SshConnector};

/// A reference-counted SSH session to one device.
///
/// Not for concurrent use from several tasks; wrap it in a mutex if it has
/// to be shared.
pub struct SshSession<C: Connector = SshConnector> {
    /// Connection configuration.
    config: SshConfig,

    /// Key the server must present. Resolved from `host_keys` on first
    /// acquire when not configured.
    host_key: Option<HostKey>,

    /// Trust-on-first-use key source.
    host_keys: Option<Arc<HostKeyStore>>,

    /// Opens physical connections.
    connector: C,

    /// Live connection; present exactly while `open_count > 0`.
    connection: Option<C::Connection>,

    /// Outstanding acquisitions.
    open_count: usize,
}

impl<C: Connector> SshSession<C> {
    /// Create a closed session.
    pub fn new(
        config: SshConfig,
        host_key: Option<HostKey>,
        host_keys: Option<Arc<HostKeyStore>>,
        connector: C,
    ) -> Self {
        Self {
            config,
            host_key,
            host_keys,
            connector,
            connection: None,
            open_count: 0,
        }
    }

    /// Target host.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Connection configuration.
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// The trusted host key, once known.
    pub fn host_key(&self) -> Option<&HostKey> {
        self.host_key.as_ref()
    }

    /// Number of outstanding acquisitions.
    pub fn open_count(&self) -> usize {
        self.open_count
    }

    /// Check if the physical connection is open.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Acquire the session, connecting on the first acquisition.
    ///
    /// On failure the count is left unchanged and no connection is kept.
    pub async fn acquire(&mut self) -> Result<()> {
        if self.open_count > 0 {
            self.open_count += 1;
            debug!("{}: nested acquire (depth {})", self.config.host, self.open_count);
            return Ok(());
        }

        let trusted = self.trusted_host_key().await?;
        let connection = self.connector.connect(&self.config, &trusted).await?;

        self.connection = Some(connection);
        self.open_count = 1;
        Ok(())
    }

    /// Release one acquisition, disconnecting on the last.
    ///
    /// Releasing a session that is not acquired is a caller bug: it panics
    /// in debug builds and returns [`SessionError::NotOpen`] otherwise.
    pub async fn release(&mut self) -> Result<()> {
        debug_assert!(
            self.open_count > 0,
            "SshSession::release() called without a matching acquire()"
        );

        match self.open_count {
            0 => Err(SessionError::NotOpen.into()),
            1 => {
                self.open_count = 0;
                match self.connection.take() {
                    Some(connection) => connection.close().await,
                    None => Ok(()),
                }
            }
            _ => {
                self.open_count -= 1;
                debug!("{}: nested release (depth {})", self.config.host, self.open_count);
                Ok(())
            }
        }
    }

    /// Acquire the session and return a guard that releases it.
    pub async fn enter(&mut self) -> Result<SessionGuard<'_, C>> {
        self.acquire().await?;
        Ok(SessionGuard::new(self))
    }

    /// Release without waiting, for guards dropped before `exit()`.
    ///
    /// On the last release the connection is dropped rather than closed
    /// gracefully.
    fn release_abandoned(&mut self) {
        match self.open_count {
            0 => warn!("{}: abandoned release on a closed session", self.config.host),
            1 => {
                self.open_count = 0;
                if self.connection.take().is_some() {
                    warn!("{}: dropping connection without a clean close", self.config.host);
                }
            }
            _ => self.open_count -= 1,
        }
    }

    /// Run `command` and capture its output.
    ///
    /// The exit status is returned, not judged: a non-zero or missing status
    /// is not an error here.
    pub async fn execute(&mut self, command: &str) -> Result<ExecOutput> {
        self.connection()?.execute(command).await
    }

    /// Run `command` and return its trimmed stdout lines.
    ///
    /// Fails with [`SessionError::CommandFailed`] unless the command exited
    /// with status 0.
    pub async fn run(&mut self, command: &str) -> Result<Vec<String>> {
        let output = self.execute(command).await?;
        if !output.success() {
            return Err(SessionError::CommandFailed {
                command: command.to_string(),
                message: output.error_text(),
            }
            .into());
        }
        Ok(output.lines())
    }

    /// Like [`run`](Self::run), without failing on the exit status.
    pub async fn run_unchecked(&mut self, command: &str) -> Result<Vec<String>> {
        Ok(self.execute(command).await?.lines())
    }

    /// Write `data` to `path` on the device.
    pub async fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.connection()?.write_file(path, data).await
    }

    /// Read `path` from the device.
    pub async fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.connection()?.read_file(path).await
    }

    /// List the entries of directory `path` on the device.
    pub async fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        self.connection()?.list_dir(path).await
    }

    fn connection(&mut self) -> Result<&mut C::Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| SessionError::NotOpen.into())
    }

    async fn trusted_host_key(&mut self) -> Result<HostKey> {
        if let Some(key) = &self.host_key {
            return Ok(key.clone());
        }

        let store = self.host_keys.as_ref().ok_or_else(|| SessionError::InvalidConfig {
            message: format!(
                "no host key configured for {} and no host key store to learn it from",
                self.config.host
            ),
        })?;

        let record = store.for_host(&self.config.host, self.config.port).await?;
        let key = record.host_key().ok_or_else(|| SessionError::InvalidConfig {
            message: format!("host key store returned an empty key for {}", self.config.host),
        })?;

        self.host_key = Some(key.clone());
        Ok(key)
    }
}
