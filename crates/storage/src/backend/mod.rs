//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait: the interface the document
//! store uses both for its durable record slot and for the managed directory
//! that holds image payloads.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// It's a glorified CRUD interface over relative paths, plus [`import`](Self::import)
/// for pulling files in from outside the storage root (camera captures land in
/// a temporary location first).
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use scanbox_storage::{backend::StorageBackend, error::Result};
///
/// async fn payload_bytes(backend: &dyn StorageBackend) -> Result<u64> {
///     let files = backend.list(Some(Path::new("camscanner"))).await?;
///     Ok(files.iter().map(|file| file.size).sum())
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Collects [`list_stream()`](Self::list_stream) into a [`Vec`].
    async fn list(&self, dir: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(dir).try_collect().await
    }

    /// Stream every file below `dir` (recursively), or below the root.
    ///
    /// A directory that doesn't exist yields an empty stream, not an error.
    /// `camscanner` covers `camscanner/1.jpg` but not
    /// `camscanner_documents.json`.
    fn list_stream<'a>(&'a self, dir: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use scanbox_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let json = backend.read(Path::new("camscanner_documents.json")).await?;
    /// println!("Read {} bytes", json.len());
    /// # Ok(())
    /// # }
    /// ```
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents.
    ///
    /// Creates a new file or overwrites an existing file with the provided
    /// data. Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Copy a file from outside the storage root into the backend.
    ///
    /// `source` is a path on the local filesystem (not validated against the
    /// storage root). Returns the number of bytes copied. Returns
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if `source` does not
    /// exist.
    ///
    /// The default implementation reads `source` into memory and hands it to
    /// [`write()`](Self::write).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use scanbox_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let copied = backend
    ///     .import(Path::new("/tmp/ImagePicker/capture.jpg"), Path::new("camscanner/1718900000000.jpg"))
    ///     .await?;
    /// println!("Copied {copied} bytes");
    /// # Ok(())
    /// # }
    /// ```
    async fn import(&self, source: &Path, path: &Path) -> Result<u64> {
        let data = tokio::fs::read(source).await.map_err(|e| ErrorKind::from_io(e, source))?;
        self.write(path, &data).await?;
        Ok(data.len() as u64)
    }

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Location reference for a stored file, suitable for handing to
    /// collaborators that open payloads directly (viewers, share sheets).
    ///
    /// The path is validated but the file does not have to exist.
    fn locate(&self, path: &Path) -> Result<String>;

    /// Inverse of [`locate()`](Self::locate): the relative path a location
    /// reference points at, or `None` when it points somewhere outside this
    /// backend.
    fn resolve(&self, location: &str) -> Option<PathBuf>;
}
