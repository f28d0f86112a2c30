//! Shared constants.

/// Cache lifetime applied to every uploaded object (30 days).
pub const CACHE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Canned ACL used when none is configured.
pub const DEFAULT_ACL: &str = "public-read";

/// Region used when neither `S3_REGION` nor `AWS_REGION` is set.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Mount point of the serve router.
pub const DEFAULT_SERVE_BASE_PATH: &str = "/content/images";

pub const DEFAULT_SERVER_PORT: u16 = 4000;

/// `Cache-Control` value sent with uploads.
pub fn cache_control_header() -> String {
    format!("max-age={}", CACHE_MAX_AGE_SECS)
}
