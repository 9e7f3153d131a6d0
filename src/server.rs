//! HTTP API over the registry, dispatcher, provisioning flow and editor.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/catalog` | Catalog tree |
//! | `GET`  | `/endpoints` | Endpoint map |
//! | `GET`  | `/modules/{name}/metadata` | Backend-provided module metadata |
//! | `POST` | `/modules/{name}/dispatch` | Multipart form → artifact bytes or `{filename, result}` |
//! | `POST` | `/modules` | Provision a module |
//! | `GET`  | `/editor/modules` | Module directories |
//! | `GET`  | `/editor/modules/{dir}/code` | Module source with version |
//! | `PUT`  | `/editor/modules/{dir}/code` | Save module source |
//!
//! # Dispatch form
//!
//! `file` carries the CSV, `query` the selected query type, and every other
//! text field is a parameter value keyed by its schema key.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "missing_parameters", "message": "Please provide values for ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `missing_parameters`, `malformed_schema`, `invalid_module`, `invalid_upload` | 400 |
//! | `not_found` | 404 |
//! | `version_conflict`, `duplicate_module` | 409 |
//! | `backend_error` | 502 |
//! | `store_unavailable`, `ports_exhausted` | 503 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the dashboard can be
//! served from anywhere.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::CatalogTree;
use crate::config::Config;
use crate::dispatch::{DispatchEngine, DispatchResult};
use crate::editor::{ModuleCode, ModuleEditor};
use crate::endpoints::EndpointMap;
use crate::error::ToolboxError;
use crate::metadata::ModuleMetadata;
use crate::provision::{provision, ProvisionReport, ProvisionRequest};
use crate::registry::Registry;
use crate::schema::{UploadedFile, FILE_PART, QUERY_PART};
use crate::session::FormSession;
use crate::store::{self, DocumentStore};

/// Largest accepted request body; datasets arrive as multipart uploads.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    engine: Arc<DispatchEngine>,
    editor: Arc<ModuleEditor>,
}

/// Starts the HTTP server on `[server].bind` with the configured store.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = store::from_config(config)?;
    let app = router(config, store)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the API router over `store`.
pub fn router(config: &Config, store: Arc<dyn DocumentStore>) -> Result<Router, ToolboxError> {
    let state = AppState {
        registry: Arc::new(Registry::new(store.clone(), config)),
        engine: Arc::new(DispatchEngine::new(&config.dispatch)?),
        editor: Arc::new(ModuleEditor::new(store, config)?),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/health", get(handle_health))
        .route("/catalog", get(handle_catalog))
        .route("/endpoints", get(handle_endpoints))
        .route("/modules", post(handle_provision))
        .route("/modules/{name}/metadata", get(handle_metadata))
        .route("/modules/{name}/dispatch", post(handle_dispatch))
        .route("/editor/modules", get(handle_list_modules))
        .route(
            "/editor/modules/{dir}/code",
            get(handle_read_code).put(handle_save_code),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ToolboxError> for AppError {
    fn from(err: ToolboxError) -> Self {
        let status = match &err {
            ToolboxError::MissingParameters(_)
            | ToolboxError::MalformedSchema(_)
            | ToolboxError::InvalidModule(_)
            | ToolboxError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            ToolboxError::MissingEndpoint(_) | ToolboxError::NotFound(_) => StatusCode::NOT_FOUND,
            ToolboxError::VersionConflict { .. } | ToolboxError::DuplicateModule { .. } => {
                StatusCode::CONFLICT
            }
            ToolboxError::BackendError(_) => StatusCode::BAD_GATEWAY,
            ToolboxError::StoreUnavailable(_) | ToolboxError::PortsExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Registry reads ============

async fn handle_catalog(State(state): State<AppState>) -> Result<Json<CatalogTree>, AppError> {
    let snapshot = state.registry.load().await?;
    Ok(Json(snapshot.catalog))
}

async fn handle_endpoints(State(state): State<AppState>) -> Result<Json<EndpointMap>, AppError> {
    let snapshot = state.registry.load().await?;
    Ok(Json(snapshot.endpoints))
}

async fn handle_metadata(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ModuleMetadata>, AppError> {
    let endpoints = state.registry.fetch_endpoints().await?.value;
    let metadata = state.engine.fetch_metadata(&name, &endpoints).await?;
    Ok(Json(metadata))
}

// ============ POST /modules/{name}/dispatch ============

#[derive(Serialize)]
struct StructuredResponse {
    filename: String,
    result: serde_json::Value,
}

/// Reads the multipart form into a [`FormSession`] and dispatches it.
///
/// Artifacts come back as `application/octet-stream` with a
/// `Content-Disposition` carrying the suggested filename.
async fn handle_dispatch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let snapshot = state.registry.load().await?;
    let schema = snapshot.catalog.dispatchable(&name)?.clone();

    let mut session = FormSession::new();
    session.select(name.as_str());

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name == FILE_PART {
            let file_name = field.file_name().unwrap_or("upload.csv").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(e.to_string()))?;
            session.attach_file(UploadedFile::new(file_name, bytes.to_vec()))?;
        } else {
            let text = field.text().await.map_err(|e| bad_request(e.to_string()))?;
            if field_name == QUERY_PART {
                session.select_query_type(text);
            } else {
                session.set_value(field_name, text);
            }
        }
    }

    let request = session.submit()?;
    let result = state
        .engine
        .dispatch(&request, &schema, &snapshot.endpoints)
        .await?;

    Ok(match result {
        DispatchResult::Artifact {
            bytes,
            suggested_filename,
        } => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    content_disposition(&suggested_filename),
                ),
            ],
            bytes,
        )
            .into_response(),
        DispatchResult::StructuredResult {
            json,
            suggested_filename,
        } => Json(StructuredResponse {
            filename: suggested_filename,
            result: json,
        })
        .into_response(),
    })
}

/// `attachment` disposition with `name` as a quoted-string.
///
/// Quotes and backslashes are escaped, control characters dropped and
/// non-ASCII characters replaced with `_` so the value stays a valid header.
fn content_disposition(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            c if c.is_control() => {}
            c if !c.is_ascii() => quoted.push('_'),
            c => quoted.push(c),
        }
    }
    format!("attachment; filename=\"{}\"", quoted)
}

// ============ POST /modules ============

async fn handle_provision(
    State(state): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<ProvisionReport>), AppError> {
    let report = provision(&state.registry, &request).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

// ============ Editor ============

#[derive(Serialize)]
struct ModuleListResponse {
    modules: Vec<String>,
}

async fn handle_list_modules(
    State(state): State<AppState>,
) -> Result<Json<ModuleListResponse>, AppError> {
    let modules = state.editor.list_modules().await?;
    Ok(Json(ModuleListResponse { modules }))
}

/// `{dir}` may also be a sub-module name; see [`ModuleEditor::resolve_dir`].
async fn handle_read_code(
    State(state): State<AppState>,
    Path(dir): Path<String>,
) -> Result<Json<ModuleCode>, AppError> {
    let dir = resolve_dir(&state, &dir).await?;
    Ok(Json(state.editor.read_code(&dir).await?))
}

async fn resolve_dir(state: &AppState, target: &str) -> Result<String, ToolboxError> {
    let endpoints = state.registry.fetch_endpoints().await?.value;
    state.editor.resolve_dir(target, &endpoints).await
}

#[derive(Deserialize)]
struct SaveCodeRequest {
    code: String,
}

#[derive(Serialize)]
struct SaveCodeResponse {
    version: String,
}

async fn handle_save_code(
    State(state): State<AppState>,
    Path(dir): Path<String>,
    Json(body): Json<SaveCodeRequest>,
) -> Result<Json<SaveCodeResponse>, AppError> {
    let dir = resolve_dir(&state, &dir).await?;
    let version = state.editor.save_code(&dir, &body.code).await?;
    Ok(Json(SaveCodeResponse { version }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let cases = [
            (ToolboxError::MissingParameters(vec!["Column".into()]), 400, "missing_parameters"),
            (ToolboxError::MalformedSchema("x".into()), 400, "malformed_schema"),
            (ToolboxError::InvalidModule("x".into()), 400, "invalid_module"),
            (ToolboxError::NotFound("x".into()), 404, "not_found"),
            (ToolboxError::MissingEndpoint("m".into()), 404, "not_found"),
            (ToolboxError::VersionConflict { path: "p".into() }, 409, "version_conflict"),
            (
                ToolboxError::DuplicateModule {
                    name: "m".into(),
                    category: "c".into(),
                    group: "g".into(),
                },
                409,
                "duplicate_module",
            ),
            (ToolboxError::BackendError("boom".into()), 502, "backend_error"),
            (ToolboxError::StoreUnavailable("down".into()), 503, "store_unavailable"),
            (
                ToolboxError::PortsExhausted {
                    sub_module: "m".into(),
                    base_port: 5000,
                },
                503,
                "ports_exhausted",
            ),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status.as_u16(), status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn backend_message_passes_through() {
        let app: AppError = ToolboxError::BackendError("Column 'age' not found".into()).into();
        assert_eq!(app.message, "Column 'age' not found");
    }

    #[test]
    fn disposition_escapes_quotes() {
        assert_eq!(
            content_disposition("anonymized_20240101120000_people"),
            "attachment; filename=\"anonymized_20240101120000_people\""
        );
        assert_eq!(
            content_disposition("anonymized_1_my \"best\" data"),
            "attachment; filename=\"anonymized_1_my \\\"best\\\" data\""
        );
        assert_eq!(
            content_disposition("a\\b\r\nc"),
            "attachment; filename=\"a\\\\bc\""
        );
        assert_eq!(
            content_disposition("données"),
            "attachment; filename=\"donn_es\""
        );
        let value = content_disposition("x\"; filename=evil");
        assert!(header::HeaderValue::from_str(&value).is_ok());
        assert!(value.ends_with("x\\\"; filename=evil\""));
    }
}
