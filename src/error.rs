//! Error taxonomy shared by the registry, dispatcher, and provisioning flow.
//!
//! Every variant maps to one user-visible failure. Nothing here is retried
//! automatically; callers decide whether to resubmit.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolboxError {
    /// Transport or auth failure talking to the document store.
    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected a write because the expected version is stale.
    #[error("version conflict on '{path}': document changed since it was read")]
    VersionConflict { path: String },

    /// Client-side validation failed. Carries every missing label at once.
    #[error("Please provide values for the following required parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    /// The sub-module has a catalog entry but no endpoint.
    #[error("No API URL found for module: {0}")]
    MissingEndpoint(String),

    /// Non-2xx or error-shaped response from a module's backend service.
    #[error("{0}")]
    BackendError(String),

    /// A schema or registry document does not have the expected structure.
    #[error("malformed schema: {0}")]
    MalformedSchema(String),

    /// The sub-module name is already registered under another category/group.
    #[error("module '{name}' already exists under {category} / {group}")]
    DuplicateModule {
        name: String,
        category: String,
        group: String,
    },

    #[error("invalid module: {0}")]
    InvalidModule(String),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Every port above the configured base is already assigned.
    #[error("no free port left for '{sub_module}' above base port {base_port}")]
    PortsExhausted { sub_module: String, base_port: u16 },
}

impl ToolboxError {
    /// Machine-readable code used by the HTTP API error body.
    pub fn code(&self) -> &'static str {
        match self {
            ToolboxError::StoreUnavailable(_) => "store_unavailable",
            ToolboxError::VersionConflict { .. } => "version_conflict",
            ToolboxError::MissingParameters(_) => "missing_parameters",
            ToolboxError::MissingEndpoint(_) => "not_found",
            ToolboxError::BackendError(_) => "backend_error",
            ToolboxError::MalformedSchema(_) => "malformed_schema",
            ToolboxError::DuplicateModule { .. } => "duplicate_module",
            ToolboxError::InvalidModule(_) => "invalid_module",
            ToolboxError::InvalidUpload(_) => "invalid_upload",
            ToolboxError::NotFound(_) => "not_found",
            ToolboxError::PortsExhausted { .. } => "ports_exhausted",
        }
    }
}

pub type Result<T, E = ToolboxError> = std::result::Result<T, E>;
