//! Persistence port for stored items plus two adapters.
//!
//! A run never writes item by item: it stages inserts and updates into a
//! [`WriteBatch`] and hands the whole batch to [`ItemStore::commit`], which
//! applies all of it or none of it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ingest::types::{ItemPatch, StoredItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Insert(StoredItem),
    Update { key: String, patch: ItemPatch },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: StoredItem) {
        self.ops.push(WriteOp::Insert(item));
    }

    pub fn update(&mut self, key: impl Into<String>, patch: ItemPatch) {
        self.ops.push(WriteOp::Update {
            key: key.into(),
            patch,
        });
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// View of `key` as it will look once this batch commits, layered over
    /// the committed value.
    pub fn staged(&self, key: &str, committed: Option<StoredItem>) -> Option<StoredItem> {
        let mut cur = committed;
        for op in &self.ops {
            match op {
                WriteOp::Insert(item) if item.link == key => cur = Some(item.clone()),
                WriteOp::Update { key: k, patch } if k == key => {
                    if let Some(item) = cur.as_mut() {
                        patch.apply_to(item);
                    }
                }
                _ => {}
            }
        }
        cur
    }

    /// Apply onto a map, failing on the first conflicting op. The map is left
    /// half-applied on error, so callers apply onto a scratch copy.
    fn apply(&self, items: &mut HashMap<String, StoredItem>) -> Result<()> {
        for op in &self.ops {
            match op {
                WriteOp::Insert(item) => {
                    if items.contains_key(&item.link) {
                        bail!("duplicate insert for key {}", item.link);
                    }
                    items.insert(item.link.clone(), item.clone());
                }
                WriteOp::Update { key, patch } => {
                    let item = items
                        .get_mut(key)
                        .ok_or_else(|| anyhow!("update for unknown key {key}"))?;
                    patch.apply_to(item);
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredItem>>;
    /// All-or-nothing.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
    async fn len(&self) -> Result<usize>;
}

// ------------------------------------------------------------
// In-memory store
// ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, StoredItem>>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = StoredItem>) -> Self {
        let map = items.into_iter().map(|i| (i.link.clone(), i)).collect();
        Self {
            items: RwLock::new(map),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Make every following commit fail (degraded-store simulation).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<StoredItem> {
        let mut v: Vec<_> = self.items.read().values().cloned().collect();
        v.sort_by(|a, b| a.link.cmp(&b.link));
        v
    }

    pub fn get(&self, key: &str) -> Option<StoredItem> {
        self.items.read().get(key).cloned()
    }
}

#[async_trait::async_trait]
impl ItemStore for MemoryStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredItem>> {
        Ok(self.get(key))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        let mut items = self.items.write();
        let mut scratch = items.clone();
        batch.apply(&mut scratch)?;
        *items = scratch;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.items.read().len())
    }
}

// ------------------------------------------------------------
// JSON file store
// ------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileImage {
    items: Vec<StoredItem>,
}

/// Whole-store JSON file. Commits write a temp file and rename it over the
/// old one; the in-memory view changes only after the rename succeeded.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    items: tokio::sync::RwLock<HashMap<String, StoredItem>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match tokio::fs::read_to_string(&path).await {
            Ok(s) => {
                let image: FileImage = serde_json::from_str(&s)
                    .with_context(|| format!("parsing store file {}", path.display()))?;
                image.items.into_iter().map(|i| (i.link.clone(), i)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading store file {}", path.display()))
            }
        };
        tracing::info!(path = %path.display(), items = items.len(), "json store opened");
        Ok(Self {
            path,
            items: tokio::sync::RwLock::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, items: &HashMap<String, StoredItem>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut list: Vec<StoredItem> = items.values().cloned().collect();
        list.sort_by(|a, b| a.link.cmp(&b.link));
        let bytes = serde_json::to_vec_pretty(&FileImage { items: list })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ItemStore for JsonFileStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredItem>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        // Writers serialize on the lock for the whole write so two commits
        // cannot interleave their file images.
        let mut items = self.items.write().await;
        let mut scratch = items.clone();
        batch.apply(&mut scratch)?;
        self.persist(&scratch).await?;
        *items = scratch;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.items.read().await.len())
    }
}
