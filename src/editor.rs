//! Browse and edit module source in the document store.
//!
//! Each module lives in a top-level directory with its code at
//! `{dir}/{dir}.py`. Provisioning names the directory after the sub-module
//! as given; older modules may only be reachable through the last path
//! segment of their endpoint URL.

use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

use crate::config::Config;
use crate::endpoints::EndpointMap;
use crate::error::{Result, ToolboxError};
use crate::store::DocumentStore;

/// Source text of a module and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleCode {
    pub dir: String,
    pub path: String,
    pub text: String,
    pub version: String,
}

pub struct ModuleEditor {
    store: Arc<dyn DocumentStore>,
    excludes: GlobSet,
}

impl ModuleEditor {
    /// Excludes the configured globs plus both registry documents.
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Result<Self> {
        let mut patterns = config.editor.exclude_globs.clone();
        patterns.push(config.store.catalog_path.clone());
        patterns.push(config.store.endpoints_path.clone());
        Ok(Self {
            store,
            excludes: build_globset(&patterns)?,
        })
    }

    /// Top-level module directories, sorted.
    pub async fn list_modules(&self) -> Result<Vec<String>> {
        let mut dirs: Vec<String> = self
            .store
            .list("")
            .await?
            .into_iter()
            .filter(|e| e.is_dir && !self.excludes.is_match(&e.name))
            .map(|e| e.name)
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Directory for `target`, which may be a directory or sub-module name.
    ///
    /// A directory already holding `{target}/{target}.py` wins; otherwise the
    /// endpoint URL decides via [`module_dir`].
    pub async fn resolve_dir(&self, target: &str, endpoints: &EndpointMap) -> Result<String> {
        if let Ok(path) = code_path(target) {
            if self.store.get(&path).await?.is_some() {
                return Ok(target.trim_matches('/').to_string());
            }
        }
        Ok(module_dir(target, endpoints))
    }

    pub async fn read_code(&self, dir: &str) -> Result<ModuleCode> {
        let path = code_path(dir)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| ToolboxError::NotFound(path.clone()))?;
        let text = String::from_utf8(doc.content)
            .map_err(|_| ToolboxError::InvalidModule(format!("{} is not UTF-8", path)))?;
        Ok(ModuleCode {
            dir: dir.to_string(),
            path,
            text,
            version: doc.version,
        })
    }

    /// Overwrite the module code, expecting the version as of just now.
    ///
    /// A write landing between the re-fetch and the put still fails with
    /// `VersionConflict`.
    pub async fn save_code(&self, dir: &str, text: &str) -> Result<String> {
        let path = code_path(dir)?;
        let current = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| ToolboxError::NotFound(path.clone()))?;
        let version = self
            .store
            .put(
                &path,
                text.as_bytes(),
                Some(&current.version),
                &format!("Update {}.py in {}", dir, dir),
            )
            .await?;
        tracing::info!(%path, "module code saved");
        Ok(version)
    }
}

/// Directory named by `sub_module`'s endpoint URL, or the name itself.
pub fn module_dir(sub_module: &str, endpoints: &EndpointMap) -> String {
    endpoints
        .get(sub_module)
        .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
        .filter(|seg| !seg.is_empty() && !seg.contains(':'))
        .unwrap_or(sub_module)
        .to_string()
}

fn code_path(dir: &str) -> Result<String> {
    let dir = dir.trim_matches('/');
    if dir.is_empty() || dir.contains('/') || dir == ".." {
        return Err(ToolboxError::NotFound(format!("module directory '{}'", dir)));
    }
    Ok(format!("{}/{}.py", dir, dir))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ToolboxError::InvalidModule(format!("bad exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ToolboxError::InvalidModule(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    fn seeded() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.seed("structure.json", b"{}");
        store.seed("moduleConfig.json", b"{}");
        store.seed("docker-compose.yml", b"services: {}");
        store.seed(".github/workflows/ci.yml", b"on: push");
        store.seed("nginx/nginx.conf", b"server {}");
        store.seed("k-anonymity/k-anonymity.py", b"print('k')");
        store.seed("tvae/tvae.py", b"print('t')");
        store
    }

    fn editor(store: Arc<InMemoryDocumentStore>) -> ModuleEditor {
        ModuleEditor::new(store, &Config::minimal()).unwrap()
    }

    #[tokio::test]
    async fn lists_only_module_directories() {
        let ed = editor(seeded());
        assert_eq!(ed.list_modules().await.unwrap(), vec!["k-anonymity", "tvae"]);
    }

    #[tokio::test]
    async fn read_then_save() {
        let store = seeded();
        let ed = editor(store.clone());

        let code = ed.read_code("tvae").await.unwrap();
        assert_eq!(code.path, "tvae/tvae.py");
        assert_eq!(code.text, "print('t')");

        let v = ed.save_code("tvae", "print('t2')").await.unwrap();
        let again = ed.read_code("tvae").await.unwrap();
        assert_eq!(again.text, "print('t2')");
        assert_eq!(again.version, v);
    }

    #[tokio::test]
    async fn missing_code_is_not_found() {
        let ed = editor(seeded());
        assert!(matches!(ed.read_code("ctgan").await, Err(ToolboxError::NotFound(_))));
        assert!(matches!(ed.save_code("ctgan", "x").await, Err(ToolboxError::NotFound(_))));
        assert!(matches!(ed.read_code("a/b").await, Err(ToolboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn provisioned_directory_keeps_its_case() {
        let store = seeded();
        store.seed("TVAE Synthesis/TVAE Synthesis.py", b"print('s')");
        let ed = editor(store);
        let endpoints: EndpointMap = [
            ("TVAE Synthesis".to_string(), "http://127.0.0.1:5002/tvae synthesis".to_string()),
            ("Laplace Mechanism".to_string(), "http://127.0.0.1:5003/k-anonymity".to_string()),
        ]
        .into_iter()
        .collect();

        let dir = ed.resolve_dir("TVAE Synthesis", &endpoints).await.unwrap();
        assert_eq!(dir, "TVAE Synthesis");
        assert_eq!(ed.read_code(&dir).await.unwrap().text, "print('s')");

        // no directory of that name, so the URL segment decides
        let dir = ed.resolve_dir("Laplace Mechanism", &endpoints).await.unwrap();
        assert_eq!(dir, "k-anonymity");
        assert_eq!(ed.resolve_dir("ctgan", &endpoints).await.unwrap(), "ctgan");
    }

    #[test]
    fn dir_from_endpoint_url() {
        let endpoints: EndpointMap = [
            ("Laplace Mechanism".to_string(), "http://127.0.0.1:5003/laplace".to_string()),
            ("bare".to_string(), "http://127.0.0.1:5004/".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(module_dir("Laplace Mechanism", &endpoints), "laplace");
        assert_eq!(module_dir("bare", &endpoints), "bare");
        assert_eq!(module_dir("unknown", &endpoints), "unknown");
    }
}
