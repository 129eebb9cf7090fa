//! # rossh
//!
//! Async SSH configuration management for MikroTik RouterOS devices.
//!
//! rossh opens SSH sessions whose server identity is pinned to a host key
//! learned on first contact, and deploys configuration by uploading a
//! self-removing RouterOS script and checking its output.
//!
//! ## Features
//!
//! - Trust-on-first-use host keys with pluggable persistence
//! - Reference-counted sessions that nest safely
//! - Exec channels and SFTP transfers via russh
//! - Diff-driven, script-based configuration deployment
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rossh::{HostKeyStore, JsonFileRepository, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rossh::Error> {
//!     let store = Arc::new(HostKeyStore::new(JsonFileRepository::new("hostkeys.json")));
//!     let mut session = SessionBuilder::new("192.168.88.1")
//!         .username("admin")
//!         .password("secret")
//!         .host_key_store(store)
//!         .build()?;
//!
//!     let mut guard = session.enter().await?;
//!     for line in guard.run("/system resource print").await? {
//!         println!("{line}");
//!     }
//!     guard.exit().await?;
//!     Ok(())
//! }
//! ```

pub mod deploy;
pub mod error;
pub mod hostkey;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use deploy::{ConfigDeployer, DeployOutcome, DeployRequest};
pub use error::{Error, Result};
pub use hostkey::{HostKey, HostKeyRecord, HostKeyStore, JsonFileRepository, KeyType, MemoryRepository};
pub use session::{SessionBuilder, SessionGuard, SshSession};
pub use transport::{AuthMethod, ExecOutput, KeyFetcher, SshConfig};
