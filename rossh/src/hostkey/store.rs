//! Trust-on-first-use host key resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use log::{debug, info};

use super::{HostKey, HostKeyRecord};
use crate::error::Result;
use crate::transport::KeyFetcher;

/// Persistence collaborator for host key records.
///
/// Implementations decide where records live; the store only ever reads a
/// record by hostname and saves complete records.
pub trait HostKeyRepository: Send + Sync {
    /// Look up the record for `hostname`.
    fn get_by_hostname(&self, hostname: &str) -> Result<Option<HostKeyRecord>>;

    /// Insert or replace the record for `record.hostname`.
    fn save(&self, record: &HostKeyRecord) -> Result<()>;
}

/// Source of server host keys for hosts seen for the first time.
pub trait HostKeyFetcher: Send + Sync {
    /// Retrieve the key `host` presents on `port`.
    fn fetch_host_key<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<HostKey>>;
}

/// Host key cache with trust-on-first-use fetching.
///
/// The first lookup for a hostname fetches the key from the device and
/// persists it; every later lookup returns the persisted key without
/// touching the network.
///
/// Concurrent first lookups for one hostname are serialized inside this
/// store, so only one of them fetches. Stores in separate processes sharing
/// one repository are not coordinated.
pub struct HostKeyStore {
    repository: Arc<dyn HostKeyRepository>,
    fetcher: Arc<dyn HostKeyFetcher>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl HostKeyStore {
    /// Create a store that fetches unknown keys over the network.
    pub fn new(repository: impl HostKeyRepository + 'static) -> Self {
        Self::with_fetcher(Arc::new(repository), Arc::new(KeyFetcher::default()))
    }

    /// Create a store with an explicit fetcher.
    pub fn with_fetcher(
        repository: Arc<dyn HostKeyRepository>,
        fetcher: Arc<dyn HostKeyFetcher>,
    ) -> Self {
        Self {
            repository,
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get the record for `hostname`, fetching the key from port 22 if needed.
    pub async fn for_hostname(&self, hostname: &str) -> Result<HostKeyRecord> {
        self.for_host(hostname, 22).await
    }

    /// Get the record for `hostname`, fetching the key from `port` if needed.
    ///
    /// A fetch failure is returned as-is and nothing is persisted.
    pub async fn for_host(&self, hostname: &str, port: u16) -> Result<HostKeyRecord> {
        if let Some(record) = self.known(hostname)? {
            return Ok(record);
        }

        let gate = self.gate(hostname);
        let held = gate.lock().await;

        // Someone else may have learned it while we waited
        let result = match self.known(hostname) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => self.learn(hostname, port).await,
            Err(e) => Err(e),
        };
        drop(held);

        // Waiters hold clones of the gate; the entry goes only with the last of them
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let last = in_flight
            .get(hostname)
            .is_some_and(|entry| Arc::ptr_eq(entry, &gate) && Arc::strong_count(&gate) == 2);
        if last {
            in_flight.remove(hostname);
        }
        result
    }

    fn known(&self, hostname: &str) -> Result<Option<HostKeyRecord>> {
        let record = self.repository.get_by_hostname(hostname)?;
        Ok(record.filter(HostKeyRecord::has_key))
    }

    fn gate(&self, hostname: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(hostname.to_string())
            .or_default()
            .clone()
    }

    async fn learn(&self, hostname: &str, port: u16) -> Result<HostKeyRecord> {
        debug!("No host key cached for {}, fetching from port {}", hostname, port);
        let key = self.fetcher.fetch_host_key(hostname, port).await?;

        let record = HostKeyRecord::new(hostname, key);
        self.repository.save(&record)?;

        info!(
            "Learned {} host key for {} ({})",
            record.key_type,
            hostname,
            record
                .host_key()
                .map(|k| k.fingerprint())
                .unwrap_or_default()
        );
        Ok(record)
    }
}

/// In-process repository, for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<HashMap<String, HostKeyRecord>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HostKeyRepository for MemoryRepository {
    fn get_by_hostname(&self, hostname: &str) -> Result<Option<HostKeyRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hostname)
            .cloned())
    }

    fn save(&self, record: &HostKeyRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.hostname.clone(), record.clone());
        Ok(())
    }
}
