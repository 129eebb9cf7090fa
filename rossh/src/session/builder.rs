//! Builder for creating SSH sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::SshSession;
use crate::error::{Result, SessionError};
use crate::hostkey::{HostKey, HostKeyStore};
use crate::transport::config::{AuthMethod, SshConfig};
use crate::transport::{Connector, SshConnector};

/// Builder for constructing [`SshSession`]s.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rossh::{HostKeyStore, JsonFileRepository, SessionBuilder};
///
/// # fn example() -> Result<(), rossh::Error> {
/// let store = Arc::new(HostKeyStore::new(JsonFileRepository::new("hostkeys.json")));
/// let session = SessionBuilder::new("192.168.88.1")
///     .username("admin")
///     .private_key("/home/admin/.ssh/id_ecdsa")
///     .host_key_store(store)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<SecretString>,
    private_key: Option<(PathBuf, Option<SecretString>)>,
    host_key: Option<String>,
    host_keys: Option<Arc<HostKeyStore>>,
    timeout: Duration,
}

impl SessionBuilder {
    /// Create a new session builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            password: None,
            private_key: None,
            host_key: None,
            host_keys: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    ///
    /// Ignored when a private key is also configured.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set private key authentication.
    ///
    /// The path is used as given; `~` is not expanded.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.private_key = Some((key_path.into(), None));
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.private_key = Some((
            key_path.into(),
            Some(SecretString::from(passphrase.into())),
        ));
        self
    }

    /// Trust exactly this host key, in known_hosts form
    /// (`"ecdsa-sha2-nistp256 AAAA..."`).
    pub fn host_key(mut self, key: impl Into<String>) -> Self {
        self.host_key = Some(key.into());
        self
    }

    /// Learn the host key from `store` on first connect.
    ///
    /// An explicit [`host_key`](Self::host_key) wins over the store.
    pub fn host_key_store(mut self, store: Arc<HostKeyStore>) -> Self {
        self.host_keys = Some(store);
        self
    }

    /// Bound on connecting, authenticating and each operation (default: 10s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a session over russh.
    ///
    /// This does not connect; the connection opens on the first
    /// [`SshSession::acquire`].
    pub fn build(self) -> Result<SshSession> {
        self.build_with(SshConnector)
    }

    /// Build a session that opens connections through `connector`.
    pub fn build_with<C: Connector>(self, connector: C) -> Result<SshSession<C>> {
        let username = self.username.ok_or_else(|| invalid("Username is required"))?;

        let auth = match (self.private_key, self.password) {
            (Some((path, passphrase)), _) => {
                if !path.is_file() {
                    return Err(invalid(format!(
                        "Private key file not found: {}",
                        path.display()
                    )));
                }
                AuthMethod::PrivateKey { path, passphrase }
            }
            (None, Some(password)) => AuthMethod::Password(password),
            (None, None) => {
                return Err(invalid("A password or private key is required"));
            }
        };

        let host_key = self
            .host_key
            .map(|text| {
                text.parse::<HostKey>()
                    .map_err(|e| invalid(format!("Invalid host key for {}: {e}", self.host)))
            })
            .transpose()?;

        let config = SshConfig {
            host: self.host,
            port: self.port,
            username,
            auth,
            timeout: self.timeout,
        };

        Ok(SshSession::new(config, host_key, self.host_keys, connector))
    }
}

fn invalid(message: impl Into<String>) -> crate::Error {
    SessionError::InvalidConfig {
        message: message.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::Error;
    use crate::hostkey::tests::P256_KEY;
    use crate::session::tests::FakeConnector;

    fn assert_invalid(result: Result<SshSession<FakeConnector>>, needle: &str) {
        match result {
            Err(Error::Session(SessionError::InvalidConfig { message })) => {
                assert!(message.contains(needle), "{message}");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected InvalidConfig"),
        }
    }

    #[test]
    fn test_defaults() {
        let session = SessionBuilder::new("router1")
            .username("admin")
            .password("secret")
            .build_with(FakeConnector::default())
            .unwrap();

        assert_eq!(session.host(), "router1");
        assert_eq!(session.config().port, 22);
        assert_eq!(session.config().timeout, Duration::from_secs(10));
        assert_eq!(session.config().auth.name(), "password");
        assert!(session.host_key().is_none());
        assert_eq!(session.open_count(), 0);
    }

    #[test]
    fn test_username_required() {
        let result = SessionBuilder::new("router1")
            .password("secret")
            .build_with(FakeConnector::default());
        assert_invalid(result, "Username");
    }

    #[test]
    fn test_credential_required() {
        let result = SessionBuilder::new("router1")
            .username("admin")
            .build_with(FakeConnector::default());
        assert_invalid(result, "password or private key");
    }

    #[test]
    fn test_missing_private_key_file() {
        let result = SessionBuilder::new("router1")
            .username("admin")
            .private_key("/nonexistent/id_ecdsa")
            .build_with(FakeConnector::default());
        assert_invalid(result, "/nonexistent/id_ecdsa");
    }

    #[test]
    fn test_private_key_takes_precedence() {
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(key_file, "not checked until connect").unwrap();

        let session = SessionBuilder::new("router1")
            .username("admin")
            .password("secret")
            .private_key_with_passphrase(key_file.path(), "hunter2")
            .build_with(FakeConnector::default())
            .unwrap();

        match &session.config().auth {
            AuthMethod::PrivateKey { path, passphrase } => {
                assert_eq!(path, key_file.path());
                assert!(passphrase.is_some());
            }
            other => panic!("unexpected auth method: {}", other.name()),
        }
    }

    #[test]
    fn test_explicit_host_key() {
        let session = SessionBuilder::new("router1")
            .username("admin")
            .password("secret")
            .host_key(P256_KEY)
            .build_with(FakeConnector::default())
            .unwrap();

        assert_eq!(session.host_key().unwrap().to_string(), P256_KEY);
    }

    #[test]
    fn test_malformed_host_key() {
        let result = SessionBuilder::new("router1")
            .username("admin")
            .password("secret")
            .host_key("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5")
            .build_with(FakeConnector::default());
        assert_invalid(result, "Invalid host key for router1");
    }
}
