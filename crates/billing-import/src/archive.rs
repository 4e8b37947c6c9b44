//! Export archive extraction

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ImportError, Result};

/// Extract every entry of a zip archive under `dest_dir`.
///
/// # Returns
/// The extracted file when the archive holds exactly one top-level entry and
/// that entry is a file, otherwise `dest_dir` itself.
///
/// Entries keep the permission bits recorded in the archive on Unix. Output
/// written before a failing entry is left in place.
pub fn unpack(archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file = File::open(archive).map_err(|e| ImportError::retrieve(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;
    fs::create_dir_all(dest_dir).map_err(|e| ImportError::retrieve(dest_dir, e))?;

    // first path component -> whether it is a plain file
    let mut top_level: BTreeMap<PathBuf, bool> = BTreeMap::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| zip_error(archive, e))?;
        let relative = entry.enclosed_name().ok_or_else(|| ImportError::Retrieve {
            path: archive.to_path_buf(),
            reason: format!("entry '{}' escapes the extraction directory", entry.name()),
            source: None,
        })?;
        let out = dest_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| ImportError::retrieve(&out, e))?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent).map_err(|e| ImportError::retrieve(parent, e))?;
            }
            let mut target = File::create(&out).map_err(|e| ImportError::retrieve(&out, e))?;
            let written = io::copy(&mut entry, &mut target).map_err(|e| ImportError::retrieve(&out, e))?;
            debug!(entry = %relative.display(), bytes = written, "Extracted entry");

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(|e| ImportError::retrieve(&out, e))?;
            }
        }

        let mut components = relative.components().filter(|c| matches!(c, Component::Normal(_)));
        if let Some(first) = components.next() {
            let is_file = !entry.is_dir() && components.next().is_none();
            top_level
                .entry(PathBuf::from(first.as_os_str()))
                .and_modify(|file| *file = *file && is_file)
                .or_insert(is_file);
        }
    }

    let unpacked = match top_level.iter().next() {
        Some((name, true)) if top_level.len() == 1 => dest_dir.join(name),
        _ => dest_dir.to_path_buf(),
    };
    info!(archive = %archive.display(), entries = zip.len(), path = %unpacked.display(), "Unpacked archive");
    Ok(unpacked)
}

fn zip_error(archive: &Path, err: zip::result::ZipError) -> ImportError {
    ImportError::Retrieve {
        path: archive.to_path_buf(),
        reason: err.to_string(),
        source: None,
    }
}
