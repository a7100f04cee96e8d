//! # Autotag Common Library
//!
//! Shared code for the autotag workspace:
//! - Error and result types
//! - TOML configuration loading, ENV overrides and atomic write-back
//! - Track lifecycle events (EventBus)

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
