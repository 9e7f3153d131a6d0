//! # Anonymization Toolbox CLI (`atb`)
//!
//! ## Usage
//!
//! ```bash
//! atb --config ./config/atb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atb catalog` | Print the catalog tree |
//! | `atb endpoints` | Print the endpoint map |
//! | `atb metadata <module>` | Fetch a module's description from its backend |
//! | `atb dispatch <module>` | Submit a CSV to a module and save the result |
//! | `atb provision <name>` | Upload and register a new module |
//! | `atb reconcile` | Compare catalog and endpoints, optionally repair |
//! | `atb editor list\|show\|save` | Browse and edit module source |
//! | `atb serve` | Start the HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG` to adjust (default `anon_toolbox=info`).

use anon_toolbox::commands::{self, DispatchArgs, ProvisionArgs};
use anon_toolbox::config;
use anon_toolbox::server;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Anonymization Toolbox: module registry, dispatch and provisioning.
#[derive(Parser)]
#[command(
    name = "atb",
    about = "Anonymization Toolbox: register, provision and call data-anonymization services",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the catalog tree.
    Catalog {
        /// One line per sub-module with its endpoint.
        #[arg(long)]
        flat: bool,
    },

    /// Print the endpoint map.
    Endpoints,

    /// Fetch a module's metadata from its backend.
    Metadata { module: String },

    /// Submit a CSV to a module.
    Dispatch {
        module: String,

        /// CSV file to upload.
        #[arg(long)]
        file: PathBuf,

        /// Parameter value, repeatable.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Query type for query-family modules.
        #[arg(long)]
        query: Option<String>,

        /// Directory the result is saved into.
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// File name to save under instead of the suggested one.
        #[arg(long)]
        rename: Option<String>,
    },

    /// Upload a module bundle and register it.
    Provision {
        name: String,

        #[arg(long)]
        algorithm_type: String,

        #[arg(long)]
        category: String,

        /// Parameter schema JSON.
        #[arg(long)]
        schema: PathBuf,

        /// Module source (`{name}.py`).
        #[arg(long)]
        code: PathBuf,

        #[arg(long)]
        dockerfile: PathBuf,

        #[arg(long)]
        requirements: PathBuf,

        /// Metadata JSON; defaults to the standard template.
        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// Find catalog entries without endpoints and endpoints without entries.
    Reconcile {
        /// Assign endpoints to catalog entries that lack one.
        #[arg(long)]
        repair: bool,
    },

    /// Browse and edit module source.
    Editor {
        #[command(subcommand)]
        action: EditorAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum EditorAction {
    /// List module directories.
    List,
    /// Print a module's code.
    Show { module: String },
    /// Replace a module's code with the contents of a local file.
    Save { module: String, file: PathBuf },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("anon_toolbox=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Catalog { flat } => commands::run_catalog(&cfg, flat).await?,
        Commands::Endpoints => commands::run_endpoints(&cfg).await?,
        Commands::Metadata { module } => commands::run_metadata(&cfg, &module).await?,
        Commands::Dispatch {
            module,
            file,
            params,
            query,
            out,
            rename,
        } => {
            commands::run_dispatch(
                &cfg,
                DispatchArgs {
                    sub_module: module,
                    file,
                    params,
                    query,
                    out_dir: out,
                    rename,
                },
            )
            .await?
        }
        Commands::Provision {
            name,
            algorithm_type,
            category,
            schema,
            code,
            dockerfile,
            requirements,
            metadata,
        } => {
            commands::run_provision(
                &cfg,
                ProvisionArgs {
                    name,
                    algorithm_type,
                    category,
                    schema,
                    code,
                    dockerfile,
                    requirements,
                    metadata,
                },
            )
            .await?
        }
        Commands::Reconcile { repair } => commands::run_reconcile(&cfg, repair).await?,
        Commands::Editor { action } => match action {
            EditorAction::List => commands::run_editor_list(&cfg).await?,
            EditorAction::Show { module } => commands::run_editor_show(&cfg, &module).await?,
            EditorAction::Save { module, file } => {
                commands::run_editor_save(&cfg, &module, &file).await?
            }
        },
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
