//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::RwLock;

const MOCK_SCHEME: &str = "mock://";

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation.
///
/// Individual paths can be made to fail on write or delete with
/// [`fail_writes_to()`](Self::fail_writes_to) and
/// [`fail_deletes_of()`](Self::fail_deletes_of), which is how the store's
/// error paths are exercised.
///
/// # Examples
///
/// ```
/// use scanbox_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("camscanner/1.jpg", b"jpeg"),
/// ]);
/// assert!(backend.exists(Path::new("camscanner/1.jpg")).await?);
///
/// backend.write(Path::new("camscanner_documents.json"), b"[]").await?;
/// assert!(backend.exists(Path::new("camscanner_documents.json")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    failing_writes: RwLock<HashSet<PathBuf>>,
    failing_deletes: RwLock<HashSet<PathBuf>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            failing_writes: RwLock::default(),
            failing_deletes: RwLock::default(),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every write (and import) to `path` fail with an I/O error.
    pub async fn fail_writes_to(&self, path: impl AsRef<Path>) {
        let path = validate_path(path.as_ref()).expect("MockBackend::fail_writes_to: invalid path");
        self.failing_writes.write().await.insert(path);
    }

    /// Make every delete of `path` fail with a permission error.
    pub async fn fail_deletes_of(&self, path: impl AsRef<Path>) {
        let path = validate_path(path.as_ref()).expect("MockBackend::fail_deletes_of: invalid path");
        self.failing_deletes.write().await.insert(path);
    }

    /// Clear every injected failure.
    pub async fn heal(&self) {
        self.failing_writes.write().await.clear();
        self.failing_deletes.write().await.clear();
    }

    /// Number of files currently stored.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, dir: Option<&'a Path>) -> FileInfoStream<'a> {
        let dir = match dir.map(validate_path).transpose() {
            Ok(dir) => dir,
            Err(err) => return Box::pin(futures::stream::once(async { Err(err) })),
        };

        Box::pin(stream! {
            // Copy out first; the lock must not be held across `yield`.
            let files: Vec<FileInfo> = self
                .storage
                .read()
                .await
                .iter()
                .filter(|(path, _)| dir.as_ref().is_none_or(|dir| path.starts_with(dir)))
                .map(|(path, (inserted, data))| FileInfo::new(path.clone(), data.len() as u64, *inserted))
                .collect();
            for file in files {
                yield Ok(file);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_inserted, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        if self.failing_writes.read().await.contains(&path) {
            exn::bail!(ErrorKind::Io(std::io::Error::other(format!("injected write failure: {}", path.display()))));
        }
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        if self.failing_deletes.read().await.contains(&path) {
            exn::bail!(ErrorKind::PermissionDenied(path));
        }
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    fn locate(&self, path: &Path) -> Result<String> {
        let path = validate_path(path)?;
        Ok(format!("{MOCK_SCHEME}{}/{}", self.name, path.display()))
    }

    fn resolve(&self, location: &str) -> Option<PathBuf> {
        let rest = location.strip_prefix(MOCK_SCHEME)?.strip_prefix(self.name.as_str())?.strip_prefix('/')?;
        validate_path(rest).ok()
    }
}
