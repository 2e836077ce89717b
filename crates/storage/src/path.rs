//! Path validation for storage backends.
//!
//! Every relative path handed to a backend goes through [`validate`] so that
//! payload names and slot keys can never point outside the storage root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes a storage path.
///
/// `.` components and repeated separators are dropped, `..` is resolved
/// against the components seen so far, and the result must be non-empty and
/// stay inside the storage root. NUL bytes are rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use scanbox_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("camscanner/1718900000000.jpg").is_ok());
/// assert!(validate_path("camscanner_documents.json").is_ok());
/// assert!(validate_path("a/../scan.jpg").is_ok()); // (never leaves storage root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves storage root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././camscanner//./scan.jpg/").unwrap(),
///     Path::new("camscanner/scan.jpg")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                // Unix lets NUL through `components()`; syscalls would truncate at it.
                if segment.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}
