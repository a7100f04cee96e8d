//! autotag-engine: audio track identification & reconciliation
//!
//! Resolves a recording's identity from its fingerprint and file name,
//! reconciles it against three rate-limited catalogs (authority, editorial,
//! popularity) and decides, by confidence tier, whether it is safe to rewrite
//! tags and rename the file.
//!
//! Entry point is [`Orchestrator`]: build one per run with the catalog
//! adapters and collaborators, then call [`Orchestrator::run_batch`].

pub mod config;
pub mod error;
pub mod fusion;
pub mod services;
pub mod sources;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::config::{Credentials, EngineConfig};
pub use crate::error::{EngineError, Result};
pub use crate::workflow::{BatchReport, Orchestrator};
