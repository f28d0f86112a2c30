//! Data models for the adapter
//!
//! Request-scoped values handed over by the host.

mod file;

pub use file::{LogicalFile, ReadOptions};
