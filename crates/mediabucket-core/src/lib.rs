//! Mediabucket Core Library
//!
//! This crate provides configuration, domain models and constants shared by the
//! storage adapter and the HTTP surface.

pub mod config;
pub mod constants;
pub mod models;

// Re-export commonly used types
pub use config::{BaseConfig, Config, StorageConfig};
pub use models::{LogicalFile, ReadOptions};
