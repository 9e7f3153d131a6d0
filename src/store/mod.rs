//! Remote document storage abstraction.
//!
//! The [`DocumentStore`] trait is the only interface the registry, editor,
//! and provisioning flow use to reach the remote store. Each document is an
//! opaque byte payload plus an opaque version token; writes carry the
//! version the caller last saw and fail with
//! [`ToolboxError::VersionConflict`] when it is stale.
//!
//! | Backend | Module |
//! |---------|--------|
//! | In-memory (tests, offline demos) | [`memory`] |
//! | GitHub contents API | [`github`] |

pub mod github;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, ToolboxError};

pub use github::GitHubContentsStore;
pub use memory::InMemoryDocumentStore;

/// A document payload together with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub content: Vec<u8>,
    pub version: String,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

/// Abstract remote document store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](DocumentStore::get) | Fetch payload and version, `None` if absent |
/// | [`put`](DocumentStore::put) | Compare-and-swap write, returns the new version |
/// | [`list`](DocumentStore::list) | Immediate children of a directory |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<StoredDocument>>;

    /// Write `content` at `path`.
    ///
    /// `expected_version` must equal the store's current version for
    /// `path`, or be `None` when the document does not exist yet. Any
    /// mismatch fails with `VersionConflict` and leaves the document
    /// untouched.
    async fn put(
        &self,
        path: &str,
        content: &[u8],
        expected_version: Option<&str>,
        message: &str,
    ) -> Result<String>;

    /// List the immediate children of `dir` (`""` for the root).
    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>>;
}

/// A decoded JSON document and the version it was read at.
///
/// `version` is `None` when the document did not exist; committing such a
/// value creates the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Option<String>,
}

/// Build the store named by `[store].backend`.
pub fn from_config(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.store.backend.as_str() {
        "memory" => match &config.store.seed_dir {
            Some(dir) => Ok(Arc::new(InMemoryDocumentStore::from_dir(dir)?)),
            None => Ok(Arc::new(InMemoryDocumentStore::new())),
        },
        "github" => Ok(Arc::new(GitHubContentsStore::from_config(&config.store)?)),
        other => Err(ToolboxError::StoreUnavailable(format!(
            "unknown store backend '{}'",
            other
        ))),
    }
}

/// Fetch and decode a JSON document. Absent documents decode as `T::default()`.
pub async fn read_json<T>(store: &dyn DocumentStore, path: &str) -> Result<Versioned<T>>
where
    T: DeserializeOwned + Default,
{
    match store.get(path).await? {
        Some(doc) => {
            let value = serde_json::from_slice(&doc.content).map_err(|e| {
                ToolboxError::MalformedSchema(format!("{} is not valid: {}", path, e))
            })?;
            Ok(Versioned {
                value,
                version: Some(doc.version),
            })
        }
        None => {
            tracing::warn!(path, "document absent, starting from an empty value");
            Ok(Versioned {
                value: T::default(),
                version: None,
            })
        }
    }
}

/// Encode `value` as 4-space-indented JSON and write it expecting `version`.
pub async fn write_json<T: Serialize>(
    store: &dyn DocumentStore,
    path: &str,
    value: &T,
    version: Option<&str>,
    message: &str,
) -> Result<String> {
    let bytes = to_pretty_json(value)?;
    store.put(path, &bytes, version, message).await
}

/// Serialize with the 4-space indentation used by the registry documents.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| ToolboxError::MalformedSchema(e.to_string()))?;
    Ok(out)
}
