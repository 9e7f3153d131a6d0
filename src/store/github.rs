//! GitHub contents API backend.
//!
//! Each document is a file in a repository branch; its blob `sha` is the
//! version token. Writes send the `sha` the caller last read, and GitHub
//! rejects the commit when the file moved on in between.
//!
//! # Configuration
//!
//! ```toml
//! [store]
//! backend = "github"
//! owner = "data-anonymization-tool"
//! repo = "data-anonymization-modules"
//! branch = "master"
//! token_env = "ATB_GITHUB_TOKEN"
//! ```
//!
//! # Status mapping
//!
//! | HTTP | Meaning |
//! |------|---------|
//! | 200/201 | OK |
//! | 404 | document absent (`get`) |
//! | 409, 422 | stale or missing `sha` → `VersionConflict` |
//! | other | `StoreUnavailable` |

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{DocumentStore, StoreEntry, StoredDocument};
use crate::config::StoreConfig;
use crate::error::{Result, ToolboxError};

/// Document store backed by a GitHub repository.
pub struct GitHubContentsStore {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
    committer: Option<Committer>,
}

#[derive(Debug, Clone, Serialize)]
struct Committer {
    name: String,
    email: String,
}

#[derive(Deserialize)]
struct FileResponse {
    #[serde(default)]
    content: String,
    sha: String,
}

#[derive(Deserialize)]
struct DirEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    committer: Option<&'a Committer>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

impl GitHubContentsStore {
    /// Build a store from `[store]` config, reading the token from the
    /// environment variable named by `token_env`.
    pub fn from_config(cfg: &StoreConfig) -> Result<Self> {
        let token = std::env::var(&cfg.token_env).ok();
        if token.is_none() {
            tracing::warn!(
                env = %cfg.token_env,
                "no GitHub token set, requests will be unauthenticated"
            );
        }
        let committer = cfg
            .committer_email
            .as_ref()
            .map(|email| (cfg.committer_name.clone(), email.clone()));
        Self::new(
            &cfg.api_base,
            &cfg.owner,
            &cfg.repo,
            &cfg.branch,
            token,
            committer,
        )
    }

    pub fn new(
        api_base: &str,
        owner: &str,
        repo: &str,
        branch: &str,
        token: Option<String>,
        committer: Option<(String, String)>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("anon-toolbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolboxError::StoreUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            token,
            committer: committer.map(|(name, email)| Committer { name, email }),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.owner,
            self.repo,
            encode_path(path)
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json");
        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("token {}", token));
        }
        req
    }
}

fn unavailable(path: &str, e: impl std::fmt::Display) -> ToolboxError {
    ToolboxError::StoreUnavailable(format!("{}: {}", path, e))
}

async fn status_error(path: &str, resp: reqwest::Response) -> ToolboxError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ToolboxError::StoreUnavailable(format!(
        "{} (HTTP {}): {}",
        path,
        status,
        body.chars().take(300).collect::<String>()
    ))
}

#[async_trait]
impl DocumentStore for GitHubContentsStore {
    async fn get(&self, path: &str) -> Result<Option<StoredDocument>> {
        let url = self.contents_url(path);
        let resp = self
            .request(reqwest::Method::GET, &url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await
            .map_err(|e| unavailable(path, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error(path, resp).await);
        }

        let file: FileResponse = resp.json().await.map_err(|e| unavailable(path, e))?;
        let content = decode_content(&file.content).map_err(|e| unavailable(path, e))?;
        tracing::debug!(path, sha = %file.sha, bytes = content.len(), "fetched document");
        Ok(Some(StoredDocument {
            content,
            version: file.sha,
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        expected_version: Option<&str>,
        message: &str,
    ) -> Result<String> {
        let url = self.contents_url(path);
        let body = PutRequest {
            message,
            content: STANDARD.encode(content),
            branch: &self.branch,
            sha: expected_version,
            committer: self.committer.as_ref(),
        };

        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(path, e))?;

        match resp.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                tracing::info!(path, "write rejected, version is stale");
                return Err(ToolboxError::VersionConflict {
                    path: path.to_string(),
                });
            }
            s if !s.is_success() => return Err(status_error(path, resp).await),
            _ => {}
        }

        let put: PutResponse = resp.json().await.map_err(|e| unavailable(path, e))?;
        tracing::info!(path, sha = %put.content.sha, "committed document");
        Ok(put.content.sha)
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        let url = self.contents_url(dir);
        let resp = self
            .request(reqwest::Method::GET, &url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await
            .map_err(|e| unavailable(dir, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ToolboxError::NotFound(format!("directory '{}'", dir)));
        }
        if !resp.status().is_success() {
            return Err(status_error(dir, resp).await);
        }

        let entries: Vec<DirEntry> = resp.json().await.map_err(|e| unavailable(dir, e))?;
        Ok(entries
            .into_iter()
            .map(|e| StoreEntry {
                is_dir: e.kind == "dir",
                name: e.name,
                path: e.path,
            })
            .collect())
    }
}

/// Decode the base64 `content` field, which GitHub wraps at 60 columns.
fn decode_content(content: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Percent-encode each path segment, keeping the `/` separators.
fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// URI-encode a string per RFC 3986, leaving `A-Z a-z 0-9 - _ . ~` intact.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
