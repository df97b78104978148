//! JSON-backed account history.
//!
//! Accounts are appended to a single JSON file, deduplicated by address and
//! capped at [`MAX_HISTORY`] entries. Credentials are stored as an opaque
//! JSON value: the store never interprets them, so an account saved by a
//! newer build with an unknown service still loads and lists cleanly.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Account, Credentials};

/// Maximum number of accounts retained, oldest evicted first.
pub const MAX_HISTORY: usize = 100;

const ACCOUNTS_FILE: &str = "accounts.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no usable data directory for this platform")]
    NoDataDir,
}

/// One persisted account record.
///
/// `credentials` stays opaque JSON until [`StoredAccount::into_account`]
/// re-tags it for a concrete provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    pub service: String,
    pub address: String,
    pub credentials: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl StoredAccount {
    fn from_account(account: &Account) -> Result<Self, StorageError> {
        Ok(Self {
            service: account.service.clone(),
            address: account.address.clone(),
            credentials: serde_json::to_value(&account.credentials)?,
            created_at: account.created_at,
            last_used: account.last_used,
        })
    }

    /// Rehydrates the typed account. Fails when the credentials belong to a
    /// service this build does not know.
    pub fn into_account(self) -> Result<Account, StorageError> {
        let credentials: Credentials = serde_json::from_value(self.credentials)?;
        Ok(Account {
            service: self.service,
            address: self.address,
            credentials,
            created_at: self.created_at,
            last_used: self.last_used,
        })
    }
}

/// File-backed store for the account history.
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    /// Store at an explicit file path. Used by tests.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform data directory.
    pub fn open_default() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("", "", "tmpmail").ok_or(StorageError::NoDataDir)?;
        Ok(Self {
            path: dirs.data_dir().join(ACCOUNTS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves an account, replacing any existing record with the same address
    /// and evicting the oldest records beyond [`MAX_HISTORY`].
    pub fn save(&self, account: &Account) -> Result<(), StorageError> {
        let mut records = self.read_records()?;
        records.retain(|record| record.address != account.address);
        records.push(StoredAccount::from_account(account)?);

        if records.len() > MAX_HISTORY {
            let excess = records.len() - MAX_HISTORY;
            records.drain(..excess);
        }

        self.write_records(&records)?;
        debug!(address = %account.address, total = records.len(), "account saved");
        Ok(())
    }

    /// All records, oldest first.
    pub fn load_all(&self) -> Result<Vec<StoredAccount>, StorageError> {
        self.read_records()
    }

    /// The `count` most recent records, newest first, optionally filtered by
    /// service.
    pub fn get_recent(
        &self,
        count: usize,
        service: Option<&str>,
    ) -> Result<Vec<StoredAccount>, StorageError> {
        Ok(self
            .filtered_newest_first(service)?
            .into_iter()
            .take(count)
            .collect())
    }

    /// Record at 1-based `index` counted from the most recent, optionally
    /// filtered by service. Index 1 is the newest matching account.
    pub fn get_by_index(
        &self,
        index: usize,
        service: Option<&str>,
    ) -> Result<Option<StoredAccount>, StorageError> {
        if index == 0 {
            return Ok(None);
        }
        Ok(self
            .filtered_newest_first(service)?
            .into_iter()
            .nth(index - 1))
    }

    /// Bumps `last_used` on the record with this address.
    pub fn touch(&self, address: &str) -> Result<(), StorageError> {
        let mut records = self.read_records()?;
        for record in &mut records {
            if record.address == address {
                record.last_used = Utc::now();
            }
        }
        self.write_records(&records)
    }

    fn filtered_newest_first(
        &self,
        service: Option<&str>,
    ) -> Result<Vec<StoredAccount>, StorageError> {
        let mut records = self.read_records()?;
        records.reverse();
        if let Some(service) = service {
            records.retain(|record| record.service.eq_ignore_ascii_case(service));
        }
        Ok(records)
    }

    fn read_records(&self) -> Result<Vec<StoredAccount>, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str(&contents) {
            Ok(records) => Ok(records),
            Err(err) => {
                // A corrupt history should not brick the tool.
                warn!(path = %self.path.display(), error = %err, "account history unreadable, starting fresh");
                Ok(Vec::new())
            }
        }
    }

    fn write_records(&self, records: &[StoredAccount]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }
}
