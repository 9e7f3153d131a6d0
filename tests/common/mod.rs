//! Shared fixtures: fake anonymization backends served on an ephemeral port.

#![allow(dead_code)]

use axum::{
    extract::{Multipart, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

/// Serve `app` on `127.0.0.1:0` and return its base URL.
pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Read every part as `name=text`, one per line, in arrival order.
async fn collect_parts(mut multipart: Multipart) -> Vec<String> {
    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.unwrap();
        parts.push(format!("{}={}", name, value.trim_end()));
    }
    parts
}

async fn anonymize(multipart: Multipart) -> String {
    collect_parts(multipart).await.join("\n")
}

async fn all_queries(multipart: Multipart) -> Json<serde_json::Value> {
    let parts = collect_parts(multipart).await;
    Json(json!({ "route": "all", "parts": parts }))
}

async fn one_query(Path(query): Path<String>, multipart: Multipart) -> Json<serde_json::Value> {
    let parts = collect_parts(multipart).await;
    Json(json!({ "route": query, "parts": parts }))
}

async fn reject(multipart: Multipart) -> impl IntoResponse {
    let _ = collect_parts(multipart).await;
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Column 'age' not found in the dataset" })),
    )
}

async fn crash(multipart: Multipart) -> impl IntoResponse {
    let _ = collect_parts(multipart).await;
    (StatusCode::INTERNAL_SERVER_ERROR, "Traceback (most recent call last)")
}

async fn metadata() -> Json<serde_json::Value> {
    Json(json!({
        "k-anonymity": {
            "conceptual_Explanation": "Generalizes quasi-identifiers.",
            "technical_Explanation": "Mondrian partitioning.",
            "inputs": {
                "k": {"description": "Group size", "type": "Integer"}
            },
            "application_Platform": "Python",
            "deployable_Module": "Yes",
            "incremental_Updates": "No"
        }
    }))
}

/// Fake backend hosting several modules under one address.
///
/// | Path | Behavior |
/// |------|----------|
/// | `POST /k-anonymity` | echoes parts as text |
/// | `GET /k-anonymity/metadata` | metadata keyed by `k-anonymity` |
/// | `POST /dp-queries/` | JSON with `route = "all"` |
/// | `POST /dp-queries/{query}` | JSON with `route = query` |
/// | `POST /failing` | 400 with an `error` field |
/// | `POST /crashing` | 500 with a plain-text body |
pub fn backend() -> Router {
    Router::new()
        .route("/k-anonymity", post(anonymize))
        .route("/k-anonymity/metadata", get(metadata))
        .route("/dp-queries/", post(all_queries))
        .route("/dp-queries/{query}", post(one_query))
        .route("/failing", post(reject))
        .route("/crashing", post(crash))
}

pub const CATALOG: &str = r#"{
    "Anonymization": {
        "Syntactic": {
            "k-anonymity": {
                "parameters": [
                    {"key": "param1", "label": "Column to be anonymized"},
                    {"key": "param2", "label": "k", "optional": true}
                ]
            },
            "failing": {"parameters": []},
            "crashing": {"parameters": []}
        },
        "Differential Privacy": {
            "Differentially Private Queries": {
                "param1": {"label": "Column", "optional": false},
                "queryOptions": ["sum", "mean", "All Queries"]
            }
        }
    }
}"#;

/// Endpoint map pointing every catalog entry at `base`.
pub fn endpoints_for(base: &str) -> String {
    json!({
        "k-anonymity": format!("{}/k-anonymity", base),
        "failing": format!("{}/failing", base),
        "crashing": format!("{}/crashing", base),
        "Differentially Private Queries": format!("{}/dp-queries", base),
    })
    .to_string()
}
