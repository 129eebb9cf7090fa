//! Error types for rossh.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for rossh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Host key acquisition and storage errors
    #[error("Host key error: {0}")]
    HostKey(#[from] HostKeyError),

    /// Session lifecycle and command errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration deployment errors
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),
}

impl Error {
    /// Whether this error is a bounded wait running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Timeout(_)))
    }
}

/// Transport layer errors (SSH protocol, SFTP, sockets).
#[derive(Error, Debug)]
pub enum TransportError {
    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// SFTP sub-channel error
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Host key errors.
#[derive(Error, Debug)]
pub enum HostKeyError {
    /// The trust-on-first-use fetch could not complete
    #[error("Host key for {host}:{port} unavailable: {reason}")]
    Unavailable {
        host: String,
        port: u16,
        reason: String,
    },

    /// Key algorithm outside the supported set
    #[error("Unsupported host key algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// Key text or material could not be decoded
    #[error("Invalid host key: {0}")]
    InvalidKey(String),

    /// The host key repository failed
    #[error("Host key storage failed: {0}")]
    Storage(String),
}

/// Why opening a session failed.
#[derive(Error, Debug)]
pub enum ConnectFailure {
    /// The server presented a key other than the trusted one
    #[error("host key mismatch (expected {expected}, got {actual})")]
    HostKeyMismatch { expected: String, actual: String },

    /// The server refused our credentials
    #[error("authentication rejected for user '{user}'")]
    AuthenticationRejected { user: String },

    /// The client private key could not be loaded
    #[error("client key error: {0}")]
    Key(String),

    /// Handshake or protocol failure before authentication completed
    #[error("{0}")]
    Handshake(russh::Error),
}

/// Session layer errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Verification or authentication failed while opening a session
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        reason: ConnectFailure,
    },

    /// An operation was attempted without an acquired session
    #[error("Session not open - call acquire() or enter() first")]
    NotOpen,

    /// A remote command exited unsuccessfully
    #[error("Error executing: {command}\nError: {message}")]
    CommandFailed { command: String, message: String },

    /// Invalid configuration in the session builder
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Configuration deployment errors.
#[derive(Error, Debug)]
pub enum DeployError {
    /// The script ran but never printed the success marker
    #[error(
        "Error while executing script on {host}. File remains on the router in file {file_name}"
    )]
    VerificationFailed {
        host: String,
        file_name: String,
        stdout: String,
        stderr: String,
    },

    /// The diff collaborator could not parse a configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The desired configuration file could not be read
    #[error("Failed to read desired configuration {path:?}: {source}")]
    ReadDesired {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type alias using rossh's Error.
pub type Result<T> = std::result::Result<T, Error>;
