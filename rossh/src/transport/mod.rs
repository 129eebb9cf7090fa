//! SSH transport layer wrapping russh.
//!
//! This module provides the low-level SSH connection management: host key
//! fetching, verified connection setup, authentication, exec channels and
//! SFTP sub-channels. The session layer talks to it through the
//! [`Connector`] and [`Connection`] traits.

pub mod config;
mod fetch;
mod output;
mod ssh;

pub use config::{AuthMethod, SshConfig};
pub use fetch::KeyFetcher;
pub use output::ExecOutput;
pub use ssh::{SshConnector, SshTransport};

use std::future::Future;

use crate::error::Result;
use crate::hostkey::HostKey;

/// Opens authenticated connections that trust exactly one host key.
pub trait Connector: Send + Sync {
    /// The live connection type.
    type Connection: Connection;

    /// Connect to `config.host`, verify the server presents `trusted_key`,
    /// then authenticate.
    fn connect(
        &self,
        config: &SshConfig,
        trusted_key: &HostKey,
    ) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// One open, authenticated SSH connection.
pub trait Connection: Send {
    /// Run `command` on a fresh exec channel and wait for it to finish.
    fn execute(&mut self, command: &str) -> impl Future<Output = Result<ExecOutput>> + Send;

    /// Create or truncate `path` and write `data` to it.
    fn write_file(&mut self, path: &str, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read the whole of `path`.
    fn read_file(&mut self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Names of the entries in directory `path`.
    fn list_dir(&mut self, path: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Disconnect.
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}
