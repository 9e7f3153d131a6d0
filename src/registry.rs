//! Module registry backed by two remote documents.
//!
//! | Document | Content |
//! |----------|---------|
//! | `structure.json` | [`CatalogTree`]: category → group → sub-module → schema |
//! | `moduleConfig.json` | [`EndpointMap`]: sub-module → backend base URL |
//!
//! Nothing is cached across a write. Every mutation re-reads its document,
//! applies the change, and writes it back expecting the version it just
//! read. A concurrent writer makes that write fail with
//! [`ToolboxError::VersionConflict`]; the registry never retries on its
//! own. Re-running a mutation with the same arguments is safe.
//!
//! The two documents are written independently. A crash or conflict between
//! the catalog write and the endpoint write leaves a catalog entry without
//! an endpoint; [`Registry::reconcile`] finds and repairs those.

use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{CatalogTree, InsertOutcome};
use crate::config::Config;
use crate::endpoints::{Assignment, EndpointMap, PortAllocator};
use crate::error::{Result, ToolboxError};
use crate::schema::ParameterSchema;
use crate::store::{read_json, write_json, DocumentStore, Versioned};

/// Both registry documents as read together by [`Registry::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    pub catalog: CatalogTree,
    pub endpoints: EndpointMap,
    pub catalog_version: String,
    pub endpoints_version: String,
}

/// Catalog/endpoint disagreements found by [`Registry::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Catalog leaves with no endpoint entry.
    pub missing_endpoints: Vec<String>,
    /// Endpoint entries with no catalog leaf. Reported only, never removed.
    pub orphaned_endpoints: Vec<String>,
    /// `(sub_module, base_url)` pairs written during repair.
    pub repaired: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_endpoints.is_empty() && self.orphaned_endpoints.is_empty()
    }
}

pub struct Registry {
    store: Arc<dyn DocumentStore>,
    catalog_path: String,
    endpoints_path: String,
    allocator: PortAllocator,
}

impl Registry {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self::with_paths(
            store,
            &config.store.catalog_path,
            &config.store.endpoints_path,
            PortAllocator::from_config(&config.endpoints),
        )
    }

    pub fn with_paths(
        store: Arc<dyn DocumentStore>,
        catalog_path: &str,
        endpoints_path: &str,
        allocator: PortAllocator,
    ) -> Self {
        Self {
            store,
            catalog_path: catalog_path.to_string(),
            endpoints_path: endpoints_path.to_string(),
            allocator,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Fetch both documents. Fails as a whole if either is unavailable.
    pub async fn load(&self) -> Result<RegistrySnapshot> {
        let (catalog, endpoints) = tokio::try_join!(
            self.fetch_catalog(),
            self.fetch_endpoints()
        )?;

        let (catalog_version, endpoints_version) = match (catalog.version, endpoints.version) {
            (Some(c), Some(e)) => (c, e),
            (None, _) => return Err(missing_document(&self.catalog_path)),
            (_, None) => return Err(missing_document(&self.endpoints_path)),
        };

        tracing::debug!(
            modules = catalog.value.len(),
            endpoints = endpoints.value.len(),
            "registry loaded"
        );

        Ok(RegistrySnapshot {
            catalog: catalog.value,
            endpoints: endpoints.value,
            catalog_version,
            endpoints_version,
        })
    }

    /// Read the catalog. Leaves with a bad schema are logged and kept as
    /// invalid entries rather than failing the whole document.
    pub async fn fetch_catalog(&self) -> Result<Versioned<CatalogTree>> {
        let doc: Versioned<CatalogTree> = read_json(self.store.as_ref(), &self.catalog_path).await?;
        for (path, reason) in doc.value.invalid_leaves() {
            tracing::warn!(
                category = %path.category,
                group = %path.group,
                sub_module = %path.sub_module,
                %reason,
                "skipping catalog entry with invalid schema"
            );
        }
        Ok(doc)
    }

    pub async fn fetch_endpoints(&self) -> Result<Versioned<EndpointMap>> {
        read_json(self.store.as_ref(), &self.endpoints_path).await
    }

    /// Write a catalog back, expecting the version it was read at.
    pub async fn commit_catalog(&self, doc: &Versioned<CatalogTree>) -> Result<String> {
        write_json(
            self.store.as_ref(),
            &self.catalog_path,
            &doc.value,
            doc.version.as_deref(),
            &format!("Update {}", self.catalog_path),
        )
        .await
    }

    /// Write an endpoint map back, expecting the version it was read at.
    pub async fn commit_endpoints(&self, doc: &Versioned<EndpointMap>) -> Result<String> {
        write_json(
            self.store.as_ref(),
            &self.endpoints_path,
            &doc.value,
            doc.version.as_deref(),
            &format!("Update {}", self.endpoints_path),
        )
        .await
    }

    /// Add `sub_module` under `category / group` with one read-modify-write.
    ///
    /// An identical existing entry is left alone and nothing is written.
    pub async fn add_module(
        &self,
        category: &str,
        group: &str,
        sub_module: &str,
        schema: ParameterSchema,
    ) -> Result<InsertOutcome> {
        let mut doc = self.fetch_catalog().await?;
        let outcome = doc.value.insert(category, group, sub_module, schema)?;

        if outcome == InsertOutcome::Unchanged {
            tracing::info!(sub_module, "catalog entry already present");
            return Ok(outcome);
        }

        self.commit_catalog(&doc).await?;
        tracing::info!(category, group, sub_module, ?outcome, "catalog updated");
        Ok(outcome)
    }

    /// Assign `sub_module` a base URL with one read-modify-write.
    ///
    /// Returns the existing URL without writing if one is already assigned.
    pub async fn add_endpoint(&self, sub_module: &str) -> Result<String> {
        let mut doc = self.fetch_endpoints().await?;
        let assignment = self.allocator.assign(&mut doc.value, sub_module)?;

        if let Assignment::Existing(url) = assignment {
            tracing::info!(sub_module, %url, "endpoint already assigned");
            return Ok(url);
        }

        self.commit_endpoints(&doc).await?;
        tracing::info!(sub_module, url = assignment.url(), "endpoint assigned");
        Ok(assignment.url().to_string())
    }

    /// Compare catalog leaves with endpoint keys.
    ///
    /// With `repair`, every catalog entry lacking an endpoint gets one in a
    /// single endpoint-map write.
    pub async fn reconcile(&self, repair: bool) -> Result<ReconcileReport> {
        let catalog = self.fetch_catalog().await?;
        let mut endpoints = self.fetch_endpoints().await?;

        let mut report = ReconcileReport::default();
        for (path, _) in catalog.value.entries() {
            if !endpoints.value.contains(&path.sub_module) {
                report.missing_endpoints.push(path.sub_module);
            }
        }
        for (name, _) in endpoints.value.iter() {
            if !catalog.value.contains(name) {
                report.orphaned_endpoints.push(name.to_string());
            }
        }

        if !report.orphaned_endpoints.is_empty() {
            tracing::warn!(orphans = ?report.orphaned_endpoints, "endpoints without catalog entry");
        }

        if repair && !report.missing_endpoints.is_empty() {
            for name in &report.missing_endpoints {
                let assignment = self.allocator.assign(&mut endpoints.value, name)?;
                report
                    .repaired
                    .push((name.clone(), assignment.url().to_string()));
            }
            self.commit_endpoints(&endpoints).await?;
            tracing::info!(repaired = report.repaired.len(), "endpoint map repaired");
        }

        Ok(report)
    }
}

fn missing_document(path: &str) -> ToolboxError {
    ToolboxError::StoreUnavailable(format!("document '{}' not found", path))
}
