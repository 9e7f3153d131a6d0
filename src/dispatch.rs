//! Schema-driven request dispatch.
//!
//! Turns a form submission into a multipart POST against the sub-module's
//! backend service and classifies the answer.
//!
//! # Routing
//!
//! | Response kind | Query type | Target | Result |
//! |---------------|------------|--------|--------|
//! | structured | `All Queries` | `{base}/` | [`DispatchResult::StructuredResult`] |
//! | structured | other | `{base}/{lowercased type}` | [`DispatchResult::StructuredResult`] |
//! | any other case | – | `{base}` | [`DispatchResult::Artifact`] |
//!
//! The response kind comes from the schema's `responseKind` when present,
//! otherwise from the configured name prefix of the query family.
//!
//! Failures are terminal for the submission: a JSON `error` field from the
//! backend is surfaced verbatim, anything else as the transport message.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::DispatchConfig;
use crate::endpoints::EndpointMap;
use crate::error::{Result, ToolboxError};
use crate::metadata::ModuleMetadata;
use crate::schema::{build_wire_payload, validate, ParameterSchema, ResponseKind, UploadedFile};

/// One form submission.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub sub_module: String,
    pub file: UploadedFile,
    pub values: HashMap<String, String>,
    pub selected_query_type: Option<String>,
}

/// The outcome of a successful dispatch, ready for the save step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchResult {
    Artifact {
        #[serde(skip)]
        bytes: Vec<u8>,
        suggested_filename: String,
    },
    StructuredResult {
        json: serde_json::Value,
        suggested_filename: String,
    },
}

impl DispatchResult {
    pub fn suggested_filename(&self) -> &str {
        match self {
            DispatchResult::Artifact {
                suggested_filename, ..
            }
            | DispatchResult::StructuredResult {
                suggested_filename, ..
            } => suggested_filename,
        }
    }

    /// Write the result into `dir`, under `rename` if given.
    ///
    /// Artifacts are written verbatim, structured results as pretty JSON.
    pub fn save_as(&self, dir: &Path, rename: Option<&str>) -> std::io::Result<PathBuf> {
        let name = rename
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.suggested_filename());
        let path = dir.join(name);
        match self {
            DispatchResult::Artifact { bytes, .. } => std::fs::write(&path, bytes)?,
            DispatchResult::StructuredResult { json, .. } => {
                let text = serde_json::to_vec_pretty(json)?;
                std::fs::write(&path, text)?
            }
        }
        Ok(path)
    }
}

/// Resolved target of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub url: String,
    pub kind: ResponseKind,
}

/// `{queryresult|anonymized}_{yyyyMMddHHmmss}_{base}`.
pub fn suggested_filename(kind: ResponseKind, at: DateTime<Local>, base_name: &str) -> String {
    let prefix = match kind {
        ResponseKind::Structured => "queryresult",
        ResponseKind::Artifact => "anonymized",
    };
    format!("{}_{}_{}", prefix, at.format("%Y%m%d%H%M%S"), base_name)
}

pub struct DispatchEngine {
    client: reqwest::Client,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ToolboxError::BackendError(e.to_string()))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// How `sub_module` answers when a query type is selected.
    pub fn response_kind(&self, sub_module: &str, schema: &ParameterSchema) -> ResponseKind {
        match schema.response_kind {
            Some(kind) => kind,
            None if sub_module.starts_with(&self.config.query_family_prefix) => {
                ResponseKind::Structured
            }
            None => ResponseKind::Artifact,
        }
    }

    pub fn resolve_route(
        &self,
        sub_module: &str,
        schema: &ParameterSchema,
        base_url: &str,
        selected_query_type: Option<&str>,
    ) -> Route {
        let selected = selected_query_type.filter(|q| !q.is_empty());
        match (self.response_kind(sub_module, schema), selected) {
            (ResponseKind::Structured, Some(query)) => {
                let base = base_url.trim_end_matches('/');
                let url = if query == self.config.all_queries_sentinel {
                    format!("{}/", base)
                } else {
                    format!("{}/{}", base, query.to_lowercase())
                };
                Route {
                    url,
                    kind: ResponseKind::Structured,
                }
            }
            _ => Route {
                url: base_url.to_string(),
                kind: ResponseKind::Artifact,
            },
        }
    }

    /// Validate, send, and classify one submission.
    ///
    /// Validation failures return before any network call.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        schema: &ParameterSchema,
        endpoints: &EndpointMap,
    ) -> Result<DispatchResult> {
        let query = request.selected_query_type.as_deref();
        validate(schema, &request.values, query)?;

        let base_url = endpoints
            .get(&request.sub_module)
            .ok_or_else(|| ToolboxError::MissingEndpoint(request.sub_module.clone()))?;

        let route = self.resolve_route(&request.sub_module, schema, base_url, query);
        let payload = build_wire_payload(schema, &request.values, &request.file, query);

        tracing::info!(
            sub_module = %request.sub_module,
            url = %route.url,
            parts = payload.len(),
            "dispatching"
        );

        let resp = self
            .client
            .post(&route.url)
            .multipart(payload.into_form())
            .send()
            .await
            .map_err(|e| ToolboxError::BackendError(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ToolboxError::BackendError(e.to_string()))?;

        if !status.is_success() {
            let err = backend_error(status, &body);
            tracing::warn!(sub_module = %request.sub_module, %status, error = %err, "dispatch failed");
            return Err(err);
        }

        let filename = suggested_filename(route.kind, Local::now(), request.file.base_name());
        let result = match route.kind {
            ResponseKind::Structured => {
                let json = serde_json::from_slice(&body).map_err(|e| {
                    ToolboxError::BackendError(format!("invalid JSON result: {}", e))
                })?;
                DispatchResult::StructuredResult {
                    json,
                    suggested_filename: filename,
                }
            }
            ResponseKind::Artifact => DispatchResult::Artifact {
                bytes: body.to_vec(),
                suggested_filename: filename,
            },
        };

        tracing::info!(
            sub_module = %request.sub_module,
            file = result.suggested_filename(),
            "dispatch complete"
        );
        Ok(result)
    }

    /// Fetch the metadata entry for `sub_module` from its backend.
    pub async fn fetch_metadata(
        &self,
        sub_module: &str,
        endpoints: &EndpointMap,
    ) -> Result<ModuleMetadata> {
        let base_url = endpoints
            .get(sub_module)
            .ok_or_else(|| ToolboxError::MissingEndpoint(sub_module.to_string()))?;
        let url = format!("{}/metadata", base_url.trim_end_matches('/'));

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolboxError::BackendError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(backend_error(status, &body));
        }

        let mut doc: HashMap<String, ModuleMetadata> = resp
            .json()
            .await
            .map_err(|e| ToolboxError::BackendError(format!("invalid metadata: {}", e)))?;

        doc.remove(sub_module).ok_or_else(|| {
            ToolboxError::BackendError(format!("No metadata found for module: {}", sub_module))
        })
    }
}

/// Prefer the backend's own `error` text over the status line.
fn backend_error(status: reqwest::StatusCode, body: &[u8]) -> ToolboxError {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string));
    match message {
        Some(m) => ToolboxError::BackendError(m),
        None => ToolboxError::BackendError(format!(
            "Request failed with status code {}",
            status.as_u16()
        )),
    }
}
