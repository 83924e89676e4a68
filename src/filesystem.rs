//! Filesystem helpers for staging the extracted installer tree.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use walkdir::WalkDir;

/// Recursively copy a directory tree, returning the number of files
/// copied. Optical media trees carry no symlinks, so entries are either
/// directories or plain files.
pub fn copy_tree_counting(src: &Path, dst: &Path) -> Result<u64> {
    fs::create_dir_all(dst).with_context(|| format!("creating '{}'", dst.display()))?;

    let mut copied = 0;
    for entry in
        fs::read_dir(src).with_context(|| format!("reading directory '{}'", src.display()))?
    {
        let entry = entry.with_context(|| format!("iterating '{}'", src.display()))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if entry
            .file_type()
            .with_context(|| format!("reading file type of '{}'", src_path.display()))?
            .is_dir()
        {
            copied += copy_tree_counting(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "copying '{}' to '{}'",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Clear the read-only attribute on every file under `root`. Files copied
/// off optical media arrive read-only, and later phases overwrite them in
/// place.
#[allow(clippy::permissions_set_readonly_false)]
pub fn clear_readonly_tree(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("reading metadata of '{}'", entry.path().display()))?;
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            fs::set_permissions(entry.path(), permissions).with_context(|| {
                format!("clearing read-only on '{}'", entry.path().display())
            })?;
        }
    }
    Ok(())
}

/// SHA-256 of a file, lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .with_context(|| format!("reading '{}'", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
