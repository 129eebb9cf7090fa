//! Unauthenticated host key fetching.
//!
//! Runs only the transport-layer key exchange against a host, captures the
//! host key the server signs with, and aborts before authentication. Used
//! for trust-on-first-use: the fetched key becomes the single key later
//! sessions will accept.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, warn};
use russh::Disconnect;
use russh::client;
use russh::keys::PublicKey;
use tokio::net::TcpStream;

use super::ssh::client_config;
use crate::error::{HostKeyError, Result};
use crate::hostkey::{HostKey, HostKeyFetcher};

/// Fetches server host keys over a bare handshake.
#[derive(Debug, Clone)]
pub struct KeyFetcher {
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl Default for KeyFetcher {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl KeyFetcher {
    /// Create a fetcher with explicit TCP connect and handshake bounds.
    pub fn new(connect_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            handshake_timeout,
        }
    }

    /// Fetch the host key `host` presents on `port`.
    ///
    /// Only ECDSA (P-256, P-384, P-521) and RSA host keys are negotiated; a
    /// server offering nothing else fails the handshake. The connection is
    /// torn down before this returns, whatever the outcome.
    pub async fn fetch(&self, host: &str, port: u16) -> Result<HostKey> {
        match self.handshake(host, port).await {
            Ok(key) => {
                debug!("Fetched {} host key from {}:{}", key.key_type(), host, port);
                Ok(key)
            }
            Err(reason) => {
                warn!("Could not fetch host key from {}:{}: {}", host, port, reason);
                Err(HostKeyError::Unavailable {
                    host: host.to_string(),
                    port,
                    reason,
                }
                .into())
            }
        }
    }

    async fn handshake(&self, host: &str, port: u16) -> std::result::Result<HostKey, String> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| format!("connect timed out after {:?}", self.connect_timeout))?
            .map_err(|e| format!("connect failed: {e}"))?;

        let captured: Arc<Mutex<Option<PublicKey>>> = Arc::new(Mutex::new(None));
        let handler = KeyCapture {
            captured: captured.clone(),
        };

        let outcome = tokio::time::timeout(
            self.handshake_timeout,
            client::connect_stream(Arc::new(client_config()), stream, handler),
        )
        .await;

        let failure = match outcome {
            Err(_) => Some(format!(
                "handshake timed out after {:?}",
                self.handshake_timeout
            )),
            Ok(Err(e)) => Some(format!("handshake failed: {e}")),
            Ok(Ok(handle)) => {
                // The capture handler always rejects, but never keep a session
                let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
                None
            }
        };

        let key = captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match (key, failure) {
            (Some(key), _) => HostKey::from_public_key(&key).map_err(|e| e.to_string()),
            (None, Some(failure)) => Err(failure),
            (None, None) => Err("server presented no host key".to_string()),
        }
    }
}

impl HostKeyFetcher for KeyFetcher {
    fn fetch_host_key<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<HostKey>> {
        self.fetch(host, port).boxed()
    }
}

/// Handler that records the server key and refuses to continue.
struct KeyCapture {
    captured: Arc<Mutex<Option<PublicKey>>>,
}

impl client::Handler for KeyCapture {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        *self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(server_public_key.clone());
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = KeyFetcher::default()
            .fetch("127.0.0.1", port)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::HostKey(HostKeyError::Unavailable { port: p, .. }) if p == port
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let fetcher = KeyFetcher::new(Duration::from_secs(1), Duration::from_millis(200));
        let err = fetcher.fetch("127.0.0.1", port).await.unwrap_err();

        match err {
            Error::HostKey(HostKeyError::Unavailable { reason, .. }) => {
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        drop(listener);
    }
}
