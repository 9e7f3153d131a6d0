//! # Anonymization Toolbox
//!
//! A registry and dispatch layer for a collection of data-anonymization
//! backend services.
//!
//! Each anonymization technique runs as its own HTTP service. The toolbox
//! keeps a catalog of those services (category → group → sub-module, each
//! with a parameter schema) and an endpoint map (sub-module → base URL) in
//! a remote document store, validates user input against the schemas,
//! dispatches multipart requests to the right backend, and provisions new
//! modules.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ FormSession │──▶│  Dispatch   │──▶│ backend services │
//! │  (schema)   │   │   Engine    │   │  :5000, :5001 …  │
//! └─────────────┘   └──────┬──────┘   └──────────────────┘
//!                          │ reads
//!                   ┌──────▼──────┐   ┌──────────────────┐
//!                   │  Registry   │──▶│  DocumentStore   │
//!                   │ catalog+map │   │ GitHub / memory  │
//!                   └──────▲──────┘   └────────▲─────────┘
//!                          │ writes            │ files
//!                   ┌──────┴───────────────────┴──┐
//!                   │ Provisioning / ModuleEditor │
//!                   └─────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! atb catalog --flat                         # list registered modules
//! atb dispatch k-anonymity --file people.csv --param param1=age
//! atb provision tvae --algorithm-type "Synthetic Data" --category "Generative" ...
//! atb reconcile --repair                     # fix missing endpoints
//! atb serve                                  # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`store`] | Versioned document store (GitHub contents API, in-memory) |
//! | [`schema`] | Parameter schemas, validation, wire payloads |
//! | [`catalog`] | Catalog tree |
//! | [`endpoints`] | Endpoint map and port allocation |
//! | [`registry`] | Read-modify-write over both registry documents |
//! | [`session`] | Per-flow form state |
//! | [`dispatch`] | Routing, backend calls, result classification |
//! | [`metadata`] | Backend-provided module descriptions |
//! | [`provision`] | New-module provisioning |
//! | [`editor`] | Module source browsing and editing |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod catalog;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod editor;
pub mod endpoints;
pub mod error;
pub mod metadata;
pub mod provision;
pub mod registry;
pub mod schema;
pub mod server;
pub mod session;
pub mod store;

pub use error::{Result, ToolboxError};
