//! Content fingerprints used to detect changed exports
//!
//! Object stores publish an opaque content hash (an S3 ETag) for every object.
//! Two fingerprints are compared by value only. When the hash is a plain MD5
//! of the content (single-part uploads) it can also be checked against a local
//! copy of the object.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::error::{CommonError, Result};

/// Opaque content hash associated with an export
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The fingerprint of an export that was never imported
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Build from a raw ETag, which S3 returns wrapped in double quotes
    pub fn from_etag(etag: &str) -> Self {
        Self(etag.trim().trim_matches('"').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Multipart ETags look like `<md5>-<parts>` and do not hash the content
    pub fn is_content_md5(&self) -> bool {
        self.0.len() == 32 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Check a local file against this fingerprint.
    ///
    /// Fingerprints that are not a content MD5 cannot be verified and pass.
    pub fn verify_file(&self, path: impl AsRef<Path>) -> Result<()> {
        if !self.is_content_md5() {
            tracing::debug!(fingerprint = %self, "Fingerprint is not a content MD5, skipping verification");
            return Ok(());
        }
        let actual = compute_file_md5(path)?;
        if actual.eq_ignore_ascii_case(&self.0) {
            Ok(())
        } else {
            Err(CommonError::FingerprintMismatch {
                expected: self.0.clone(),
                actual,
            })
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Compute the MD5 of a file, streamed
pub fn compute_file_md5(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_md5(&mut file)
}

/// Compute the MD5 of any readable source
pub fn compute_md5<R: Read>(reader: &mut R) -> Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}
