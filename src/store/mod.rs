//! Per-project embedded datastore.
//!
//! Each project owns a single database file with three tables: `log`
//! holds pipeline log entries keyed by [`TimeKey`], `releases` holds
//! release metadata keyed by version string, and `files` holds the raw
//! release artifacts keyed by the [`TimeKey`] referenced from the
//! release record. Splitting metadata from blobs keeps release listings
//! cheap. The table names, key schemas, and JSON field names are a
//! persistence contract; existing data files must remain readable.

pub mod key;

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, ReadableTable, StorageError, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use key::TimeKey;

const LOG_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("log");
const RELEASES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");
const FILES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("files");

/// How long [`Store::open`] keeps retrying while another process holds
/// the database lock.
const OPEN_TIMEOUT: Duration = Duration::from_secs(60);
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Errors from datastore operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested value does not exist in the store.
    #[error("value not found")]
    NotFound,

    /// The project's datastore is not open.
    #[error("datastore is not open")]
    Closed,

    /// The backing file could not be opened or created.
    #[error("could not open datastore {path}: {source}")]
    Open {
        path: String,
        source: DatabaseError,
    },

    #[error("datastore I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("datastore transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("datastore table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("datastore storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("datastore commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("datastore serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One entry in the pipeline log.
///
/// The log table is the authoritative record of pipeline progress:
/// "latest version", "versions seen", and per-stage output are all
/// derived from it by scanning newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub when: DateTime<Utc>,
    pub version: String,
    pub stage: String,
    pub log: String,
}

/// Metadata for a stored release artifact.
///
/// The artifact bytes live in the `files` table under `file_key`,
/// written in the same transaction as this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub when: DateTime<Utc>,
    pub version: String,
    pub file_name: String,
    pub file_key: TimeKey,
}

/// Datastore for a single project.
pub struct Store {
    db: Database,
}

impl Store {
    /// Opens an existing datastore file or creates a new one, ensuring
    /// all three tables exist.
    ///
    /// The database file is exclusive-locked. If another process holds
    /// the lock, open retries for up to 60 seconds before failing; a
    /// timeout usually means another instance (or a crashed one) still
    /// owns the file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Store, StoreError> {
        let path = path.as_ref();
        let deadline = Instant::now() + OPEN_TIMEOUT;

        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(err) if Instant::now() < deadline && is_locked(&err) => {
                    tokio::time::sleep(OPEN_RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(StoreError::Open {
                        path: path.display().to_string(),
                        source: err,
                    });
                }
            }
        };

        let txn = db.begin_write()?;
        {
            txn.open_table(LOG_TABLE)?;
            txn.open_table(RELEASES_TABLE)?;
            txn.open_table(FILES_TABLE)?;
        }
        txn.commit()?;

        Ok(Store { db })
    }

    /// Appends a log entry for the given version and stage under a
    /// fresh [`TimeKey`]; the entry's `when` is the key's time.
    pub fn add_log(&self, version: &str, stage: &str, entry: &str) -> Result<(), StoreError> {
        let key = TimeKey::new();
        let data = LogEntry {
            when: key.time(),
            version: version.to_string(),
            stage: stage.to_string(),
            log: entry.to_string(),
        };
        let value = serde_json::to_vec(&data)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(LOG_TABLE)?;
            table.insert(key.as_bytes().as_slice(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Returns the most recent log entry with a non-empty version,
    /// optionally restricted to a stage. Returns `None` when no entry
    /// matches; an empty `stage` matches any stage.
    pub fn last_version(&self, stage: &str) -> Result<Option<LogEntry>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOG_TABLE)?;

        for item in table.iter()?.rev() {
            let (_, value) = item?;
            let entry: LogEntry = serde_json::from_slice(value.value())?;

            if entry.version.is_empty() {
                continue;
            }
            if !stage.is_empty() && entry.stage != stage {
                continue;
            }
            return Ok(Some(entry));
        }

        Ok(None)
    }

    /// Returns one log entry per distinct version — the newest entry
    /// for each — in newest-first order.
    pub fn versions(&self) -> Result<Vec<LogEntry>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOG_TABLE)?;

        let mut seen = HashSet::new();
        let mut versions = Vec::new();

        for item in table.iter()?.rev() {
            let (_, value) = item?;
            let entry: LogEntry = serde_json::from_slice(value.value())?;

            if entry.version.is_empty() {
                continue;
            }
            if seen.insert(entry.version.clone()) {
                versions.push(entry);
            }
        }

        Ok(versions)
    }

    /// Returns every log entry for the given version, newest first.
    pub fn version_log(&self, version: &str) -> Result<Vec<LogEntry>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOG_TABLE)?;

        let mut entries = Vec::new();
        for item in table.iter()?.rev() {
            let (_, value) = item?;
            let entry: LogEntry = serde_json::from_slice(value.value())?;
            if entry.version == version {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    /// Returns the newest log entry matching both version and stage.
    pub fn stage_log(&self, version: &str, stage: &str) -> Result<LogEntry, StoreError> {
        if version.is_empty() || stage.is_empty() {
            return Err(StoreError::NotFound);
        }

        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOG_TABLE)?;

        for item in table.iter()?.rev() {
            let (_, value) = item?;
            let entry: LogEntry = serde_json::from_slice(value.value())?;
            if entry.version == version && entry.stage == stage {
                return Ok(entry);
            }
        }

        Err(StoreError::NotFound)
    }

    /// Stores a release record and its artifact bytes in one
    /// transaction. Replacing an existing release for the version also
    /// removes the superseded artifact, so no orphan blobs accumulate.
    pub fn add_release(
        &self,
        version: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let file_key = TimeKey::new();
        let record = Release {
            when: file_key.time(),
            version: version.to_string(),
            file_name: file_name.to_string(),
            file_key,
        };
        let value = serde_json::to_vec(&record)?;

        let txn = self.db.begin_write()?;
        {
            let mut releases = txn.open_table(RELEASES_TABLE)?;
            let mut files = txn.open_table(FILES_TABLE)?;

            let replaced = releases
                .insert(version, value.as_slice())?
                .and_then(|prev| serde_json::from_slice::<Release>(prev.value()).ok())
                .map(|prev| prev.file_key);
            if let Some(old_key) = replaced {
                files.remove(old_key.as_bytes().as_slice())?;
            }

            files.insert(file_key.as_bytes().as_slice(), data)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Returns the release record for the given version.
    pub fn release(&self, version: &str) -> Result<Release, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RELEASES_TABLE)?;

        match table.get(version)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Err(StoreError::NotFound),
        }
    }

    /// Returns all release records, newest first.
    pub fn releases(&self) -> Result<Vec<Release>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RELEASES_TABLE)?;

        let mut releases = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            releases.push(serde_json::from_slice::<Release>(value.value())?);
        }
        releases.sort_by(|a, b| b.when.cmp(&a.when));

        Ok(releases)
    }

    /// Returns the most recent release record.
    pub fn last_release(&self) -> Result<Release, StoreError> {
        self.releases()?.into_iter().next().ok_or(StoreError::NotFound)
    }

    /// Returns the raw bytes of a stored release artifact.
    pub fn release_file(&self, file_key: &TimeKey) -> Result<Vec<u8>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES_TABLE)?;

        match table.get(file_key.as_bytes().as_slice())? {
            Some(value) => Ok(value.value().to_vec()),
            None => Err(StoreError::NotFound),
        }
    }

    /// Drops everything recorded for versions beyond the newest `max`:
    /// their log entries, and their release record and artifact if one
    /// exists. `max == 0` disables trimming.
    pub fn trim_versions(&self, max: usize) -> Result<(), StoreError> {
        if max == 0 {
            return Ok(());
        }

        for entry in self.versions()?.iter().skip(max) {
            self.purge_version(&entry.version)?;
        }
        Ok(())
    }

    /// Deletes every trace of one version in a single transaction.
    fn purge_version(&self, version: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut log = txn.open_table(LOG_TABLE)?;
            let keys: Vec<Vec<u8>> = {
                let mut keys = Vec::new();
                for item in log.iter()? {
                    let (key, value) = item?;
                    let entry: LogEntry = serde_json::from_slice(value.value())?;
                    if entry.version == version {
                        keys.push(key.value().to_vec());
                    }
                }
                keys
            };
            for key in &keys {
                log.remove(key.as_slice())?;
            }

            let mut releases = txn.open_table(RELEASES_TABLE)?;
            let file_key = releases
                .remove(version)?
                .and_then(|prev| serde_json::from_slice::<Release>(prev.value()).ok())
                .map(|release| release.file_key);
            if let Some(file_key) = file_key {
                let mut files = txn.open_table(FILES_TABLE)?;
                files.remove(file_key.as_bytes().as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

fn is_locked(err: &DatabaseError) -> bool {
    match err {
        DatabaseError::DatabaseAlreadyOpen => true,
        DatabaseError::Storage(StorageError::Io(io)) => io.kind() == io::ErrorKind::WouldBlock,
        _ => false,
    }
}
