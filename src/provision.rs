//! Provisioning a new anonymization module.
//!
//! A module is a directory `{name}/` in the document store holding its
//! source, metadata, Dockerfile and requirements, plus one catalog entry and
//! one endpoint. Provisioning writes them in that order:
//!
//! 1. upsert every bundle file (per-file compare-and-swap, bounded retry)
//! 2. [`Registry::add_module`]
//! 3. [`Registry::add_endpoint`]
//!
//! The steps are not transactional. A failure after step 1 leaves files
//! without a catalog entry; a failure after step 2 leaves a catalog entry
//! without an endpoint, which `reconcile --repair` fixes. Re-running the
//! same provisioning request completes whatever is missing.

use serde::{Deserialize, Serialize};

use crate::catalog::InsertOutcome;
use crate::error::{Result, ToolboxError};
use crate::metadata::ModuleMetadata;
use crate::registry::Registry;
use crate::schema::ParameterSchema;
use crate::store::{to_pretty_json, DocumentStore};

/// Attempts per file before a `VersionConflict` is surfaced.
const MAX_UPSERT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    pub name: String,
    pub content: String,
}

/// Files written under `{module}/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileBundle(Vec<BundleFile>);

impl FileBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.0.push(BundleFile {
            name: name.into(),
            content: content.into(),
        });
    }

    /// The four files every module ships with.
    pub fn standard(
        module_name: &str,
        code: &str,
        metadata: &str,
        dockerfile: &str,
        requirements: &str,
    ) -> Self {
        let mut bundle = Self::new();
        bundle.push(format!("{}.py", module_name), code);
        bundle.push(format!("{}.json", module_name), metadata);
        bundle.push("Dockerfile", dockerfile);
        bundle.push("requirements.txt", requirements);
        bundle
    }

    pub fn iter(&self) -> impl Iterator<Item = &BundleFile> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub module_name: String,
    /// Top catalog level.
    pub algorithm_type: String,
    /// Group under the algorithm type.
    pub category: String,
    /// Parameter schema as JSON text, canonical or legacy form.
    pub schema: String,
    #[serde(default)]
    pub files: FileBundle,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub module_name: String,
    pub files: Vec<String>,
    pub catalog: InsertOutcome,
    pub endpoint: String,
}

/// Default `{name}.json` content.
pub fn metadata_template(module_name: &str) -> Result<String> {
    let bytes = to_pretty_json(&ModuleMetadata::template(module_name))?;
    String::from_utf8(bytes).map_err(|e| ToolboxError::MalformedSchema(e.to_string()))
}

/// The module's source must expose its POST route under its own name.
pub fn validate_module_code(module_name: &str, code: &str) -> Result<()> {
    let route = format!("@app.route('/{}', methods=['POST'])", module_name);
    if code.contains(&route) {
        Ok(())
    } else {
        Err(ToolboxError::InvalidModule(format!(
            "module code must define the route {}",
            route
        )))
    }
}

/// Create or overwrite `{module}/{file}`, re-reading the version on conflict.
pub async fn upsert_file(
    store: &dyn DocumentStore,
    module_name: &str,
    file_name: &str,
    content: &[u8],
) -> Result<String> {
    let path = format!("{}/{}", module_name, file_name);
    let mut attempt = 1;
    loop {
        let current = store.get(&path).await?;
        let message = match current {
            Some(_) => format!("Update {} in {}", file_name, module_name),
            None => format!("Create {} in {}", file_name, module_name),
        };
        let expected = current.as_ref().map(|d| d.version.as_str());

        match store.put(&path, content, expected, &message).await {
            Ok(version) => {
                tracing::debug!(%path, attempt, "file written");
                return Ok(version);
            }
            Err(ToolboxError::VersionConflict { .. }) if attempt < MAX_UPSERT_ATTEMPTS => {
                tracing::warn!(%path, attempt, "version conflict, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run the three provisioning steps for `request`.
///
/// The name, schema and `{name}.py` route are checked before anything is
/// written.
pub async fn provision(registry: &Registry, request: &ProvisionRequest) -> Result<ProvisionReport> {
    let name = request.module_name.trim();
    if name.is_empty() {
        return Err(ToolboxError::InvalidModule("module name is empty".into()));
    }
    if request.algorithm_type.trim().is_empty() || request.category.trim().is_empty() {
        return Err(ToolboxError::InvalidModule(
            "algorithm type and category are required".into(),
        ));
    }
    if name.contains('/') {
        return Err(ToolboxError::InvalidModule(format!(
            "module name '{}' must not contain '/'",
            name
        )));
    }
    let schema = ParameterSchema::parse(&request.schema)?;
    let code_file = format!("{}.py", name);
    if let Some(code) = request.files.iter().find(|f| f.name == code_file) {
        validate_module_code(name, &code.content)?;
    }

    tracing::info!(module = name, files = request.files.len(), "provisioning module");

    let store = registry.store().as_ref();
    let mut written = Vec::with_capacity(request.files.len());
    for file in request.files.iter() {
        upsert_file(store, name, &file.name, file.content.as_bytes()).await?;
        written.push(format!("{}/{}", name, file.name));
    }

    let catalog = registry
        .add_module(&request.algorithm_type, &request.category, name, schema)
        .await?;
    let endpoint = registry.add_endpoint(name).await?;

    tracing::info!(module = name, %endpoint, "module provisioned");
    Ok(ProvisionReport {
        module_name: name.to_string(),
        files: written,
        catalog,
        endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::PortAllocator;
    use crate::store::InMemoryDocumentStore;
    use std::sync::Arc;

    const CODE: &str = "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/tvae', methods=['POST'])\ndef run():\n    pass\n";

    fn registry(store: Arc<InMemoryDocumentStore>) -> Registry {
        Registry::with_paths(
            store,
            "structure.json",
            "moduleConfig.json",
            PortAllocator::new("http", "127.0.0.1", 5000),
        )
    }

    fn request(schema: &str) -> ProvisionRequest {
        ProvisionRequest {
            module_name: "tvae".into(),
            algorithm_type: "Synthetic Data".into(),
            category: "Generative Models".into(),
            schema: schema.into(),
            files: FileBundle::standard("tvae", CODE, "{}", "FROM python:3.11", "flask\n"),
        }
    }

    #[test]
    fn standard_bundle_names() {
        let bundle = FileBundle::standard("tvae", "", "", "", "");
        let names: Vec<_> = bundle.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["tvae.py", "tvae.json", "Dockerfile", "requirements.txt"]);
    }

    #[test]
    fn code_must_define_route() {
        assert!(validate_module_code("tvae", CODE).is_ok());
        let err = validate_module_code("ctgan", CODE).unwrap_err();
        assert!(matches!(err, ToolboxError::InvalidModule(_)));
    }

    #[test]
    fn template_is_keyed_by_name() {
        let text = metadata_template("tvae").unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value["tvae"]["inputs"]["Direct identifier columns"].is_object());
        assert!(text.contains("\n    \"tvae\""));
    }

    #[tokio::test]
    async fn provisions_files_catalog_and_endpoint() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.seed("moduleConfig.json", br#"{"a": "http://127.0.0.1:5000/a"}"#);
        let reg = registry(store.clone());

        let report = provision(&reg, &request(r#"{"param1": {"label": "Epochs", "optional": true}}"#))
            .await
            .unwrap();
        assert_eq!(report.files.len(), 4);
        assert_eq!(report.catalog, InsertOutcome::Inserted);
        assert_eq!(report.endpoint, "http://127.0.0.1:5001/tvae");

        let code = store.get("tvae/tvae.py").await.unwrap().unwrap();
        assert_eq!(code.content, CODE.as_bytes());
        let catalog = reg.fetch_catalog().await.unwrap().value;
        let (path, _) = catalog.find("tvae").unwrap();
        assert_eq!(path.category, "Synthetic Data");
        assert_eq!(path.group, "Generative Models");
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let reg = registry(store.clone());
        let req = request("{}");

        let first = provision(&reg, &req).await.unwrap();
        let second = provision(&reg, &req).await.unwrap();
        assert_eq!(second.catalog, InsertOutcome::Unchanged);
        assert_eq!(first.endpoint, second.endpoint);
        assert_eq!(reg.fetch_endpoints().await.unwrap().value.len(), 1);
    }

    #[tokio::test]
    async fn malformed_schema_writes_nothing() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let reg = registry(store.clone());

        let err = provision(&reg, &request("[1, 2")).await.unwrap_err();
        assert!(matches!(err, ToolboxError::MalformedSchema(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn code_without_route_writes_nothing() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let reg = registry(store.clone());
        let mut req = request("{}");
        req.files = FileBundle::standard("tvae", "print('no route')", "{}", "", "");

        let err = provision(&reg, &req).await.unwrap_err();
        assert!(matches!(err, ToolboxError::InvalidModule(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let reg = registry(store.clone());
        let mut req = request("{}");
        req.module_name = "  ".into();

        let err = provision(&reg, &req).await.unwrap_err();
        assert!(matches!(err, ToolboxError::InvalidModule(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_file() {
        let store = InMemoryDocumentStore::new();
        let v1 = store.seed("tvae/Dockerfile", b"FROM python:3.9");
        let v2 = upsert_file(&store, "tvae", "Dockerfile", b"FROM python:3.11")
            .await
            .unwrap();
        assert_ne!(v1, v2);
        let doc = store.get("tvae/Dockerfile").await.unwrap().unwrap();
        assert_eq!(doc.content, b"FROM python:3.11");
    }
}
