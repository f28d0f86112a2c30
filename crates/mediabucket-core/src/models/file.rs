use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file the host has received and staged on local disk.
///
/// Only lives for the duration of one save call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalFile {
    /// Local temporary file holding the uploaded bytes
    pub path: PathBuf,
    /// Declared MIME type
    pub content_type: String,
    /// Original client filename
    pub name: String,
}

impl LogicalFile {
    pub fn new(
        path: impl Into<PathBuf>,
        content_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content_type: content_type.into(),
            name: name.into(),
        }
    }
}

/// Options for reading back a stored object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Fully-qualified external reference, as returned by a save.
    #[serde(default)]
    pub path: Option<String>,
}

impl ReadOptions {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}
