//! Mailcast Common - Shared types and utilities
//!
//! This crate provides configuration, the common error type and the
//! identifiers and status enums shared across all Mailcast components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
