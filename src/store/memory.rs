//! In-memory [`DocumentStore`] for tests and offline runs.
//!
//! Documents live in a `HashMap` behind `std::sync::RwLock`. The version
//! check and the write happen under one write lock, so concurrent `put`s
//! against the same version serialize exactly like the remote store: one
//! wins, the rest see `VersionConflict`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::{DocumentStore, StoreEntry, StoredDocument};
use crate::error::{Result, ToolboxError};

struct Entry {
    content: Vec<u8>,
    version: String,
}

/// In-memory store with content-derived version tokens.
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, Entry>>,
    generation: RwLock<u64>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            generation: RwLock::new(0),
        }
    }

    /// Load every file under `root`, keyed by its `/`-separated relative path.
    ///
    /// Hidden entries such as `.git` are skipped.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let store = Self::new();
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| {
                ToolboxError::StoreUnavailable(format!("cannot seed from {}: {}", root.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read(entry.path()).map_err(|e| {
                ToolboxError::StoreUnavailable(format!("cannot read {}: {}", entry.path().display(), e))
            })?;
            store.seed(&key, &content);
        }
        tracing::info!(root = %root.display(), documents = store.len(), "memory store seeded");
        Ok(store)
    }

    /// Insert or overwrite a document without a version check.
    ///
    /// Returns the new version token.
    pub fn seed(&self, path: &str, content: &[u8]) -> String {
        let version = self.next_version(path, content);
        let mut docs = self.docs.write().unwrap();
        docs.insert(
            normalize(path),
            Entry {
                content: content.to_vec(),
                version: version.clone(),
            },
        );
        version
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_version(&self, path: &str, content: &[u8]) -> String {
        let mut gen = self.generation.write().unwrap();
        *gen += 1;
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update(gen.to_le_bytes());
        hasher.update(content);
        hex::encode(hasher.finalize())
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<StoredDocument>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.get(&normalize(path)).map(|e| StoredDocument {
            content: e.content.clone(),
            version: e.version.clone(),
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        expected_version: Option<&str>,
        _message: &str,
    ) -> Result<String> {
        let key = normalize(path);
        let version = self.next_version(&key, content);
        let mut docs = self.docs.write().unwrap();

        let current = docs.get(&key).map(|e| e.version.as_str());
        if current != expected_version {
            return Err(ToolboxError::VersionConflict { path: key });
        }

        docs.insert(
            key,
            Entry {
                content: content.to_vec(),
                version: version.clone(),
            },
        );
        Ok(version)
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        let prefix = normalize(dir);
        let docs = self.docs.read().unwrap();
        let mut children: BTreeMap<String, bool> = BTreeMap::new();

        for key in docs.keys() {
            let rest = if prefix.is_empty() {
                key.as_str()
            } else {
                match key.strip_prefix(&prefix).and_then(|r| r.strip_prefix('/')) {
                    Some(r) => r,
                    None => continue,
                }
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    children.insert(child.to_string(), true);
                }
                None => {
                    children.entry(rest.to_string()).or_insert(false);
                }
            }
        }

        if children.is_empty() && !prefix.is_empty() {
            return Err(ToolboxError::NotFound(format!("directory '{}'", prefix)));
        }

        Ok(children
            .into_iter()
            .map(|(name, is_dir)| StoreEntry {
                path: if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                },
                name,
                is_dir,
            })
            .collect())
    }
}
