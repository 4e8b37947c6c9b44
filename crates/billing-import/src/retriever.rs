//! Export download
//!
//! The destination given to [`Retriever::fetch`] may name a file or a
//! directory, and it may not exist yet. [`resolve_destination`] decides which
//! one the caller meant.

use billing_common::fingerprint::Fingerprint;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ImportError, Result};
use crate::storage::ObjectStore;

/// Downloads exports from one bucket
pub struct Retriever {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
}

impl Retriever {
    pub fn new(objects: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
        }
    }

    /// Download `source_name` to `destination`, returning the file written
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn fetch(&self, source_name: &str, destination: &Path) -> Result<PathBuf> {
        let path = resolve_destination(destination, source_name).await?;
        debug!(path = %path.display(), "Resolved download path");

        let bytes = self
            .objects
            .download(&self.bucket, source_name, &path)
            .await
            .map_err(|e| ImportError::Retrieve {
                path: path.clone(),
                reason: format!("{:#}", e),
                source: None,
            })?;

        info!(source = %source_name, bytes, path = %path.display(), "Export downloaded");
        Ok(path)
    }

    /// Check a downloaded export against its fingerprint when it is a content MD5
    pub async fn verify(&self, path: &Path, fingerprint: &Fingerprint) -> Result<()> {
        if !fingerprint.is_content_md5() {
            warn!(fingerprint = %fingerprint, "Fingerprint is not a content hash, skipping verification");
            return Ok(());
        }

        let path = path.to_path_buf();
        let fingerprint = fingerprint.clone();
        tokio::task::spawn_blocking(move || fingerprint.verify_file(&path))
            .await
            .map_err(|e| ImportError::Backend(e.into()))??;
        debug!("Download matches its fingerprint");
        Ok(())
    }
}

/// Decide where a download for `source_name` lands.
///
/// - An existing directory gets `source_name` appended as a path component.
/// - An existing file is used as is.
/// - A missing destination has its parent directory created. When that
///   parent's path text contains the destination's last element, the
///   destination was meant as a directory and `source_name` is appended to
///   the destination text; otherwise the destination is used as is.
pub async fn resolve_destination(destination: &Path, source_name: &str) -> Result<PathBuf> {
    match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.is_dir() => Ok(destination.join(source_name)),
        Ok(_) => Ok(destination.to_path_buf()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let text = destination.to_string_lossy();
            let parent = parent_text(&text);
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ImportError::retrieve(parent, e))?;

            if parent.contains(last_element(&text)) {
                Ok(PathBuf::from(format!("{}{}", text, source_name)))
            } else {
                Ok(destination.to_path_buf())
            }
        }
        Err(e) => Err(ImportError::retrieve(destination, e)),
    }
}

/// Everything before the last element, without trailing separators
fn parent_text(path: &str) -> &str {
    let Some(idx) = path.rfind('/') else {
        return ".";
    };
    let parent = path[..idx].trim_end_matches('/');
    if parent.is_empty() {
        "/"
    } else {
        parent
    }
}

/// Last element, ignoring trailing separators
fn last_element(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryObjectStore;
    use billing_common::fingerprint::compute_md5;
    use tempfile::TempDir;

    const NAME: &str = "42-aws-billing-detailed-line-items-with-resources-and-tags-2017-07.csv.zip";

    #[test]
    fn test_path_text_helpers() {
        assert_eq!(parent_text("/tmp/downloads/"), "/tmp/downloads");
        assert_eq!(parent_text("/tmp/downloads/file.zip"), "/tmp/downloads");
        assert_eq!(parent_text("/file.zip"), "/");
        assert_eq!(parent_text("file.zip"), ".");
        assert_eq!(last_element("/tmp/downloads/"), "downloads");
        assert_eq!(last_element("/tmp/downloads/file.zip"), "file.zip");
        assert_eq!(last_element("/"), "/");
    }

    #[tokio::test]
    async fn test_existing_directory_gets_source_name() {
        let dir = TempDir::new().unwrap();
        let path = resolve_destination(dir.path(), NAME).await.unwrap();
        assert_eq!(path, dir.path().join(NAME));
    }

    #[tokio::test]
    async fn test_existing_file_is_used_verbatim() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("target.zip");
        std::fs::write(&file, b"old").unwrap();

        assert_eq!(resolve_destination(&file, NAME).await.unwrap(), file);
    }

    #[tokio::test]
    async fn test_missing_directory_spec_appends_source_name() {
        let dir = TempDir::new().unwrap();
        let destination = format!("{}/downloads/", dir.path().display());

        let path = resolve_destination(Path::new(&destination), NAME).await.unwrap();
        assert_eq!(path, PathBuf::from(format!("{}{}", destination, NAME)));
        assert!(dir.path().join("downloads").is_dir());
    }

    #[tokio::test]
    async fn test_missing_file_spec_is_used_verbatim() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("staging").join("export.zip");

        let path = resolve_destination(&destination, NAME).await.unwrap();
        assert_eq!(path, destination);
        assert!(dir.path().join("staging").is_dir());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_fetch_and_verify() {
        let body = b"zip bytes".to_vec();
        let md5 = compute_md5(&mut body.as_slice()).unwrap();
        let objects = Arc::new(MemoryObjectStore::new());
        objects.insert("bucket", NAME, Some(&format!("\"{}\"", md5)), body);

        let dir = TempDir::new().unwrap();
        let retriever = Retriever::new(objects, "bucket");
        let path = retriever.fetch(NAME, dir.path()).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"zip bytes");

        retriever.verify(&path, &Fingerprint::new(md5)).await.unwrap();
        let err = retriever
            .verify(&path, &Fingerprint::new("0123456789abcdef0123456789abcdef"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Common(_)));

        // multipart ETags cannot be checked
        retriever.verify(&path, &Fingerprint::new("abc-2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_missing_object() {
        let dir = TempDir::new().unwrap();
        let retriever = Retriever::new(Arc::new(MemoryObjectStore::new()), "bucket");
        let err = retriever.fetch(NAME, dir.path()).await.unwrap_err();
        assert!(matches!(err, ImportError::Retrieve { .. }));
    }
}
