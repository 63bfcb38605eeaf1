//! Ledger persistence backends.

use crate::error::{JobError, JobResult};
use crate::job::JobRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::JobId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// The whole ledger as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(default, alias = "requests")]
    pub jobs: BTreeMap<JobId, JobRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Storage for the ledger document.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Loads the stored document. `Ok(None)` means nothing has been stored yet.
    async fn load(&self) -> JobResult<Option<LedgerDocument>>;

    /// Replaces the stored document.
    async fn save(&self, document: &LedgerDocument) -> JobResult<()>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// One pretty-printed JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load(&self) -> JobResult<Option<LedgerDocument>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        Ok(Some(serde_json::from_slice(&contents)?))
    }

    async fn save(&self, document: &LedgerDocument) -> JobResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(document)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(path = %self.path.display(), jobs = document.jobs.len(), "Ledger saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// In-process store. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<LedgerDocument>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with a stored document.
    pub fn with_document(document: LedgerDocument) -> Self {
        Self {
            document: Mutex::new(Some(document)),
            ..Self::default()
        }
    }

    /// Makes every subsequent save fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The last successfully saved document.
    pub fn snapshot(&self) -> Option<LedgerDocument> {
        self.document.lock().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self) -> JobResult<Option<LedgerDocument>> {
        Ok(self.document.lock().clone())
    }

    async fn save(&self, document: &LedgerDocument) -> JobResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(JobError::Persistence("memory store rejected write".to_string()));
        }
        *self.document.lock() = Some(document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
