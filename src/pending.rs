//! File-backed fallback buffer for history writes.
//!
//! When the history backend is unreachable, records land here and are pushed
//! in bulk on the next startup. The buffer is a pair of JSON files under a
//! configurable directory; `take_*` reads and deletes in one step so a drain
//! clears local storage regardless of whether the push succeeds.

use crate::history::{HistoryAccount, HistoryRecord};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const RECORDS_FILE: &str = "pending-records.json";
const ACCOUNTS_FILE: &str = "pending-accounts.json";

pub struct PendingBuffer {
    dir: PathBuf,
}

impl PendingBuffer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn append_record(&self, record: &HistoryRecord) -> Result<()> {
        let mut records: Vec<HistoryRecord> = self.load(RECORDS_FILE)?;
        records.push(record.clone());
        self.store(RECORDS_FILE, &records)
    }

    /// Buffers an account record, replacing any buffered entry with the same
    /// email so the upsert key holds inside the buffer too.
    pub fn append_account(&self, account: &HistoryAccount) -> Result<()> {
        let mut accounts: Vec<HistoryAccount> = self.load(ACCOUNTS_FILE)?;
        match accounts.iter_mut().find(|a| a.email == account.email) {
            Some(existing) => *existing = account.clone(),
            None => accounts.push(account.clone()),
        }
        self.store(ACCOUNTS_FILE, &accounts)
    }

    /// Returns all buffered records and clears the file.
    pub fn take_records(&self) -> Result<Vec<HistoryRecord>> {
        self.take(RECORDS_FILE)
    }

    /// Returns all buffered accounts and clears the file.
    pub fn take_accounts(&self) -> Result<Vec<HistoryAccount>> {
        self.take(ACCOUNTS_FILE)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read pending buffer {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse pending buffer {}", path.display()))
    }

    fn store<T: Serialize>(&self, name: &str, items: &[T]) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create pending dir {}", self.dir.display())
        })?;
        let path = self.path(name);
        let content = serde_json::to_string_pretty(items)?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write pending buffer {}", path.display()))
    }

    fn take<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let items = self.load(name)?;
        let path = self.path(name);
        if path.exists() {
            remove_file(&path)?;
        }
        Ok(items)
    }
}

fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .with_context(|| format!("failed to clear pending buffer {}", path.display()))
}
