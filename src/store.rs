//! Snapshot store: one document per record under a 1-based positional key.
//!
//! Every refresh clears the backend and rewrites it; this is not an append log.
//! Reads re-validate, since files on disk can be edited or truncated behind our back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use metrics::counter;
use tokio::fs;

use crate::error::{FeedError, Result};
use crate::ingest::normalize::order;
use crate::ingest::types::Record;

/// Minimal key → document persistence.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn clear(&self) -> Result<()>;
    async fn put(&self, key: usize, doc: String) -> Result<()>;
    /// Keys currently present, ascending.
    async fn keys(&self) -> Result<Vec<usize>>;
    async fn get(&self, key: usize) -> Result<String>;
}

/// `<dir>/quake_<key>.json`, pretty-printed JSON.
pub struct FsBackend {
    dir: PathBuf,
}

const FILE_PREFIX: &str = "quake_";
const FILE_SUFFIX: &str = ".json";

impl FsBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: usize) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{key}{FILE_SUFFIX}"))
    }

    fn key_of(name: &str) -> Option<usize> {
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }
}

#[async_trait]
impl KvBackend for FsBackend {
    async fn clear(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        for key in self.keys().await? {
            fs::remove_file(self.path_for(key)).await?;
        }
        Ok(())
    }

    async fn put(&self, key: usize, doc: String) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.path_for(key), doc).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<usize>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(k) = entry.file_name().to_str().and_then(Self::key_of) {
                keys.push(k);
            }
        }
        // Numeric, so quake_10 follows quake_9.
        keys.sort_unstable();
        Ok(keys)
    }

    async fn get(&self, key: usize) -> Result<String> {
        Ok(fs::read_to_string(self.path_for(key)).await?)
    }
}

/// In-process backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBackend {
    docs: Mutex<BTreeMap<usize, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<usize, String>> {
        match self.docs.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Overwrite a raw document, bypassing serialization.
    pub fn insert_raw(&self, key: usize, doc: impl Into<String>) {
        self.lock().insert(key, doc.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    async fn put(&self, key: usize, doc: String) -> Result<()> {
        self.lock().insert(key, doc);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<usize>> {
        Ok(self.lock().keys().copied().collect())
    }

    async fn get(&self, key: usize) -> Result<String> {
        self.lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| FeedError::Persistence(format!("no document under key {key}")))
    }
}

pub struct RecordStore {
    backend: Box<dyn KvBackend>,
}

impl RecordStore {
    pub fn new(backend: impl KvBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Clear, then write each valid record under keys 1..N. A record that fails to
    /// serialize or write is logged and left out. Returns how many were written.
    pub async fn replace_all(&self, records: &[Record]) -> Result<usize> {
        let cleared = self.backend.keys().await?.len();
        self.backend.clear().await?;
        let mut key = 0usize;
        for rec in records.iter().filter(|r| r.is_valid()) {
            key += 1;
            let written = match serde_json::to_string_pretty(rec) {
                Ok(doc) => self.backend.put(key, doc).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                tracing::warn!(target: "store", key, epicenter = %rec.epicenter, error = %e, "record write failed");
                counter!("store_write_errors_total").increment(1);
                // Keep keys dense.
                key -= 1;
            }
        }
        let valid = records.iter().filter(|r| r.is_valid()).count();
        if key == 0 && valid > 0 {
            // Nothing to warm from after a restart until the next good refresh.
            tracing::warn!(target: "store", cleared, valid, "every write failed; store left empty");
        } else {
            tracing::info!(target: "store", cleared, written = key, "store replaced");
        }
        Ok(key)
    }

    /// Every readable, valid record, in recency order.
    pub async fn load_all(&self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for key in self.backend.keys().await? {
            let rec = self
                .backend
                .get(key)
                .await
                .and_then(|doc| serde_json::from_str::<Record>(&doc).map_err(FeedError::from));
            match rec {
                Ok(r) if r.is_valid() => out.push(r),
                Ok(r) => {
                    tracing::warn!(target: "store", key, reason = r.invalid_reason(), "ignoring invalid stored record");
                }
                Err(e) => {
                    tracing::warn!(target: "store", key, error = %e, "ignoring unreadable stored record");
                }
            }
        }
        Ok(order(out))
    }
}
