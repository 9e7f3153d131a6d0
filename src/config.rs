//! TOML configuration parsing.
//!
//! ```toml
//! [store]
//! backend = "github"
//! owner = "data-anonymization-tool"
//! repo = "data-anonymization-modules"
//! branch = "master"
//! token_env = "ATB_GITHUB_TOKEN"
//!
//! [endpoints]
//! scheme = "http"
//! host = "127.0.0.1"
//! base_port = 5000
//!
//! [dispatch]
//! timeout_secs = 120
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"github"` or `"memory"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_endpoints_path")]
    pub endpoints_path: String,
    #[serde(default = "default_committer_name")]
    pub committer_name: String,
    #[serde(default)]
    pub committer_email: Option<String>,
    /// Local checkout loaded into the `memory` backend at startup.
    #[serde(default)]
    pub seed_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            api_base: default_api_base(),
            owner: String::new(),
            repo: String::new(),
            branch: default_branch(),
            token_env: default_token_env(),
            catalog_path: default_catalog_path(),
            endpoints_path: default_endpoints_path(),
            committer_name: default_committer_name(),
            committer_email: None,
            seed_dir: None,
        }
    }
}

fn default_backend() -> String {
    "github".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_branch() -> String {
    "master".to_string()
}
fn default_token_env() -> String {
    "ATB_GITHUB_TOKEN".to_string()
}
fn default_catalog_path() -> String {
    "structure.json".to_string()
}
fn default_endpoints_path() -> String {
    "moduleConfig.json".to_string()
}
fn default_committer_name() -> String {
    "data-anonymization-tool".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            base_port: default_base_port(),
        }
    }
}

fn default_scheme() -> String {
    "http".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_base_port() -> u16 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sub-modules whose names start with this prefix return structured
    /// results unless their schema says otherwise.
    #[serde(default = "default_query_family_prefix")]
    pub query_family_prefix: String,
    #[serde(default = "default_all_queries_sentinel")]
    pub all_queries_sentinel: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            query_family_prefix: default_query_family_prefix(),
            all_queries_sentinel: default_all_queries_sentinel(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}
fn default_query_family_prefix() -> String {
    "Differentially Private Queries".to_string()
}
fn default_all_queries_sentinel() -> String {
    "All Queries".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EditorConfig {
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_exclude_globs() -> Vec<String> {
    vec![
        ".github".to_string(),
        "nginx".to_string(),
        "docker-compose.yml".to_string(),
        "*.json".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// All-defaults config backed by the in-memory store.
    pub fn minimal() -> Self {
        Self {
            store: StoreConfig {
                backend: "memory".to_string(),
                ..StoreConfig::default()
            },
            endpoints: EndpointsConfig::default(),
            dispatch: DispatchConfig::default(),
            editor: EditorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    match config.store.backend.as_str() {
        "memory" => {}
        "github" => {
            if config.store.owner.is_empty() || config.store.repo.is_empty() {
                anyhow::bail!("store.owner and store.repo must be set when backend is 'github'");
            }
        }
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be github or memory.",
            other
        ),
    }

    if config.store.catalog_path == config.store.endpoints_path {
        anyhow::bail!("store.catalog_path and store.endpoints_path must differ");
    }

    if let Some(dir) = &config.store.seed_dir {
        if config.store.backend != "memory" {
            anyhow::bail!("store.seed_dir is only used with the memory backend");
        }
        if !dir.is_dir() {
            anyhow::bail!("store.seed_dir does not exist: {}", dir.display());
        }
    }

    if config.dispatch.timeout_secs == 0 {
        anyhow::bail!("dispatch.timeout_secs must be > 0");
    }

    if !matches!(config.endpoints.scheme.as_str(), "http" | "https") {
        anyhow::bail!("endpoints.scheme must be http or https");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = parse_config("[store]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(cfg.endpoints.base_port, 5000);
        assert_eq!(cfg.store.catalog_path, "structure.json");
        assert_eq!(cfg.store.endpoints_path, "moduleConfig.json");
        assert_eq!(cfg.dispatch.all_queries_sentinel, "All Queries");
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn github_backend_requires_repo() {
        let err = parse_config("[store]\nbackend = \"github\"\nowner = \"acme\"\n").unwrap_err();
        assert!(err.to_string().contains("store.repo"));
    }

    #[test]
    fn unknown_backend_rejected() {
        let err = parse_config("[store]\nbackend = \"s3\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown store backend"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err =
            parse_config("[store]\nbackend = \"memory\"\n[dispatch]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atb.toml");
        std::fs::write(
            &path,
            "[store]\nbackend = \"github\"\nowner = \"acme\"\nrepo = \"modules\"\n\n[endpoints]\nhost = \"10.0.0.5\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.store.repo, "modules");
        assert_eq!(cfg.endpoints.host, "10.0.0.5");
        assert_eq!(cfg.store.branch, "master");
    }

    #[test]
    fn seed_dir_must_exist_and_needs_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let ok = format!(
            "[store]\nbackend = \"memory\"\nseed_dir = {:?}\n",
            dir.path().display().to_string()
        );
        let cfg = parse_config(&ok).unwrap();
        assert_eq!(cfg.store.seed_dir.as_deref(), Some(dir.path()));

        let err = parse_config("[store]\nbackend = \"memory\"\nseed_dir = \"/no/such/dir\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("seed_dir does not exist"));

        let github = format!(
            "[store]\nbackend = \"github\"\nowner = \"a\"\nrepo = \"b\"\nseed_dir = {:?}\n",
            dir.path().display().to_string()
        );
        assert!(parse_config(&github).is_err());
    }
}
