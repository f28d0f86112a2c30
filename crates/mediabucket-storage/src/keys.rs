//! Shared key generation for the object store.
//!
//! Key format: `{prefix}/{target_dir}/{filename}` joined with `/`, never with a
//! leading separator. Inputs may use either `/` or `\` as separators.

use mediabucket_core::StorageConfig;

use crate::traits::{StorageError, StorageResult};

/// Remove exactly one leading `/`.
pub fn strip_leading_slash(s: &str) -> &str {
    s.strip_prefix('/').unwrap_or(s)
}

/// Remove exactly one trailing `/`.
pub fn strip_ending_slash(s: &str) -> &str {
    s.strip_suffix('/').unwrap_or(s)
}

/// Join path segments the way a filesystem path join would, independent of
/// the platform separator.
///
/// Empty and `.` segments are dropped and `..` removes the previous segment.
/// `..` never climbs above the first segment. The result keeps a leading `/`
/// only when the first non-empty part started with one.
pub fn join_path(parts: &[&str]) -> String {
    let mut absolute = None;
    let mut segments: Vec<&str> = Vec::new();

    for part in parts.iter().filter(|p| !p.is_empty()) {
        if absolute.is_none() {
            absolute = Some(part.starts_with(['/', '\\']));
        }
        for segment in part.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
    }

    let joined = segments.join("/");
    if absolute.unwrap_or(false) {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Store key for `file_name` inside an already resolved directory.
pub fn resolve(directory: &str, file_name: &str) -> String {
    strip_leading_slash(&join_path(&[directory, file_name])).to_string()
}

/// Directory for a prefix-relative target directory.
pub fn prefixed_dir(prefix: &str, target_dir: &str) -> String {
    join_path(&[prefix, target_dir])
}

/// Key requested by an inbound serve path.
pub fn serve_key(prefix: &str, request_path: &str) -> String {
    let joined = format!("{}{}", strip_ending_slash(prefix), request_path);
    strip_leading_slash(&joined).to_string()
}

/// Whether a key contains a `..` segment.
pub fn has_parent_segment(key: &str) -> bool {
    key.split(['/', '\\']).any(|segment| segment == "..")
}

/// Canonical external references of stored objects.
///
/// `url_for` produces the URL returned by a save and `key_for` maps such a URL
/// back to its key. Path-style references embed the bucket name as their
/// first segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUrls {
    base_url: String,
    bucket: String,
    embeds_bucket: bool,
}

impl ObjectUrls {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        embeds_bucket: bool,
    ) -> Self {
        let base_url: String = base_url.into();
        ObjectUrls {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            embeds_bucket,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.public_base_url(),
            config.bucket.clone(),
            config.embeds_bucket_in_path(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Public URL of `key`, with every segment percent-encoded
    pub fn url_for(&self, key: &str) -> String {
        let key = strip_leading_slash(key)
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        if self.embeds_bucket {
            format!("{}/{}/{}", self.base_url, self.bucket, key)
        } else {
            format!("{}/{}", self.base_url, key)
        }
    }

    /// Key referenced by an external URL.
    ///
    /// One trailing `/` or `\` is ignored. Fails without touching the network
    /// when the reference does not belong to the configured host.
    pub fn key_for(&self, reference: &str) -> StorageResult<String> {
        let reference = reference.strip_suffix(['/', '\\']).unwrap_or(reference);

        let rest = reference
            .strip_prefix(self.base_url.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| StorageError::NotStoredHere(reference.to_string()))?;
        let rest = strip_leading_slash(rest);

        let key = if self.embeds_bucket {
            rest.strip_prefix(self.bucket.as_str())
                .and_then(|r| r.strip_prefix('/'))
                .ok_or_else(|| {
                    StorageError::InvalidKey(format!(
                        "{} does not reference bucket {}",
                        reference, self.bucket
                    ))
                })?
        } else {
            rest
        };

        if key.is_empty() {
            return Err(StorageError::InvalidKey(format!(
                "{} does not reference an object",
                reference
            )));
        }

        urlencoding::decode(key)
            .map(|key| key.into_owned())
            .map_err(|_| StorageError::InvalidKey(reference.to_string()))
    }
}
