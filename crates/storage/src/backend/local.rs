//! Local filesystem storage backend.
//!
//! Everything lives below one root directory and is accessed with `tokio::fs`.
//! Location references are `file://` URIs of the absolute path, which is what
//! viewers and share sheets on the device expect.

use crate::backend::FileInfoStream;
use crate::error::{ErrorKind, Result};
use crate::{FileInfo, StorageBackend, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

const FILE_SCHEME: &str = "file://";

enum Entry {
    File(FileInfo),
    Dir(PathBuf),
    Other,
}

/// Storage rooted at a directory on the local filesystem.
///
/// # Examples
///
/// ```no_run
/// use scanbox_storage::backend::{LocalBackend, StorageBackend};
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/var/lib/scanbox")?;
/// let uri = backend.locate(Path::new("camscanner/1718900000000-0f8fad5b.jpg"))?;
/// assert_eq!(uri, "file:///var/lib/scanbox/camscanner/1718900000000-0f8fad5b.jpg");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Open (creating it if needed) the storage root.
    ///
    /// # Errors
    ///
    /// [`InvalidPath`](ErrorKind::InvalidPath) if `root` is relative or is an
    /// existing non-directory; an I/O error if it can't be created.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Runs once at startup, so the blocking call is acceptable.
        std::fs::create_dir_all(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    fn relative_path(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("`{}` is outside `{}`", absolute.display(), self.root.display()))
        })?;
        validate_path(relative)
    }

    async fn create_parent(&self, absolute: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::from_io(e, path))?;
        }
        Ok(())
    }

    /// Follows symlinks; dangling ones are skipped.
    async fn classify(&self, entry: DirEntry) -> Result<Entry> {
        let path = entry.path();
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Entry::Other),
            Err(err) => exn::bail!(ErrorKind::from_io(err, &path)),
        };
        if metadata.is_dir() {
            return Ok(Entry::Dir(path));
        }
        if !metadata.is_file() {
            return Ok(Entry::Other);
        }
        let modified = metadata.modified().map_err(|e| ErrorKind::from_io(e, &path))?;
        Ok(Entry::File(FileInfo::new(self.relative_path(&path)?, metadata.len(), modified)))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, dir: Option<&'a Path>) -> FileInfoStream<'a> {
        let start = match dir.map(|dir| self.absolute_path(dir)).transpose() {
            Ok(start) => start.unwrap_or_else(|| self.root.clone()),
            Err(err) => return Box::pin(futures::stream::once(async { Result::Err(err) })),
        };

        Box::pin(stream! {
            let mut pending = vec![start];
            while let Some(current) = pending.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == IoErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                        continue;
                    },
                };
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => match self.classify(entry).await {
                            Ok(Entry::File(info)) => yield Ok(info),
                            Ok(Entry::Dir(path)) => pending.push(path),
                            Ok(Entry::Other) => {},
                            Err(err) => yield Err(err),
                        },
                        Ok(None) => break,
                        Err(err) => {
                            yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                            break;
                        },
                    }
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let absolute = self.absolute_path(path)?;
        Ok(fs::try_exists(&absolute).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let absolute = self.absolute_path(path)?;
        Ok(fs::read(&absolute).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let absolute = self.absolute_path(path)?;
        self.create_parent(&absolute, path).await?;
        Ok(fs::write(&absolute, data).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn import(&self, source: &Path, path: &Path) -> Result<u64> {
        let absolute = self.absolute_path(path)?;
        if !fs::try_exists(source).await.map_err(|e| ErrorKind::from_io(e, source))? {
            exn::bail!(ErrorKind::NotFound(source.to_path_buf()));
        }
        self.create_parent(&absolute, path).await?;
        let copied = fs::copy(source, &absolute).await.map_err(|e| ErrorKind::from_io(e, path))?;
        tracing::debug!(backend = %self.name, from = %source.display(), to = %path.display(), bytes = copied, "Imported file");
        Ok(copied)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let absolute = self.absolute_path(path)?;
        Ok(fs::remove_file(&absolute).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    fn locate(&self, path: &Path) -> Result<String> {
        Ok(format!("{FILE_SCHEME}{}", self.absolute_path(path)?.display()))
    }

    fn resolve(&self, location: &str) -> Option<PathBuf> {
        let absolute = Path::new(location.strip_prefix(FILE_SCHEME).unwrap_or(location));
        if !absolute.is_absolute() {
            return None;
        }
        self.relative_path(absolute).ok()
    }
}
