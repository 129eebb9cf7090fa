//! Host key records persisted as a JSON document.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;

use super::HostKeyRecord;
use super::store::HostKeyRepository;
use crate::error::{HostKeyError, Result};

/// Durable repository storing every record in one JSON file.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// original, so readers see either the old or the new document. A missing
/// file reads as an empty repository.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    /// Use the document at `path`, creating it on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, HostKeyRecord>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                crate::Error::from(HostKeyError::Storage(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(storage_error(&self.path, e)),
        }
    }

    fn write(&self, records: &BTreeMap<String, HostKeyRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| storage_error(parent, e))?;
        }

        let contents = serde_json::to_string_pretty(records)
            .map_err(|e| HostKeyError::Storage(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents).map_err(|e| storage_error(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| storage_error(&self.path, e))?;
        Ok(())
    }
}

fn storage_error(path: &Path, e: io::Error) -> crate::Error {
    HostKeyError::Storage(format!("{}: {}", path.display(), e)).into()
}

impl HostKeyRepository for JsonFileRepository {
    fn get_by_hostname(&self, hostname: &str) -> Result<Option<HostKeyRecord>> {
        Ok(self.load()?.remove(hostname))
    }

    fn save(&self, record: &HostKeyRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.load()?;
        records.insert(record.hostname.clone(), record.clone());
        self.write(&records)?;
        debug!(
            "Saved host key record for {} to {}",
            record.hostname,
            self.path.display()
        );
        Ok(())
    }
}
