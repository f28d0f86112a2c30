//! File naming policy
//!
//! The host decides where new files land and how name collisions are avoided.
//! `FileNamer` is that capability; `DatedFileNamer` is the stock policy
//! (`{prefix}/YYYY/MM` directories, `name-N.ext` on collision).

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use mediabucket_core::LogicalFile;
use std::path::Path;

use crate::keys;
use crate::traits::{StorageError, StorageResult};

/// Answers whether a fully resolved key is already taken.
#[async_trait]
pub trait KeyLookup: Send + Sync {
    async fn key_exists(&self, key: &str) -> bool;
}

/// Directory naming and collision avoidance, provided by the host.
#[async_trait]
pub trait FileNamer: Send + Sync {
    /// Default directory for new files under `prefix`
    fn target_dir(&self, prefix: &str) -> String;

    /// A key inside `directory` that `lookup` reports as free
    async fn unique_file_name(
        &self,
        lookup: &dyn KeyLookup,
        file: &LogicalFile,
        directory: &str,
    ) -> StorageResult<String>;
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Month-bucketed directories with numbered duplicates.
#[derive(Debug, Clone)]
pub struct DatedFileNamer {
    max_attempts: u32,
}

impl Default for DatedFileNamer {
    fn default() -> Self {
        DatedFileNamer {
            max_attempts: MAX_NAME_ATTEMPTS,
        }
    }
}

impl DatedFileNamer {
    pub fn new(max_attempts: u32) -> Self {
        DatedFileNamer { max_attempts }
    }

    /// `{prefix}/YYYY/MM` for the given instant
    pub fn target_dir_at(prefix: &str, now: DateTime<Utc>) -> String {
        let year = format!("{:04}", now.year());
        let month = format!("{:02}", now.month());
        keys::join_path(&[prefix, &year, &month])
    }

    /// Replace everything except ASCII word characters, `@` and `.` with `-`.
    pub fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }

    /// Sanitized stem and extension (with its dot) of a client filename.
    fn split_name(name: &str) -> (String, String) {
        let base = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name);
        let path = Path::new(base);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(base);
        (Self::sanitize(stem), ext)
    }
}

#[async_trait]
impl FileNamer for DatedFileNamer {
    fn target_dir(&self, prefix: &str) -> String {
        Self::target_dir_at(prefix, Utc::now())
    }

    async fn unique_file_name(
        &self,
        lookup: &dyn KeyLookup,
        file: &LogicalFile,
        directory: &str,
    ) -> StorageResult<String> {
        let (stem, ext) = Self::split_name(&file.name);

        for attempt in 0..self.max_attempts {
            let candidate = if attempt == 0 {
                format!("{}{}", stem, ext)
            } else {
                format!("{}-{}{}", stem, attempt, ext)
            };
            let key = keys::resolve(directory, &candidate);

            if !lookup.key_exists(&key).await {
                return Ok(key);
            }

            tracing::debug!(key = %key, attempt, "Storage key taken, trying next name");
        }

        Err(StorageError::InvalidKey(format!(
            "no free name for {} in {} after {} attempts",
            file.name, directory, self.max_attempts
        )))
    }
}
