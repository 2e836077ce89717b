use crate::error::{ErrorKind, Result};
use crate::models::{Document, DocumentId, DocumentKind, DocumentPatch};
use crate::options::{NameFormat, PayloadPolicy, StoreOptions};
use exn::ResultExt;
use scanbox_storage::{BackendHandle, FileInfo};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tracing::instrument;

/// Used when the captured file has no usable extension.
const FALLBACK_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing has been read from the slot yet.
    #[default]
    NotLoaded,
    /// The collection has been read (or given up on) at least once. There is
    /// no way back to [`NotLoaded`](Self::NotLoaded).
    Loaded,
}

/// What readers see: the load state and the collection, newest first.
#[derive(Debug, Clone)]
pub struct StoreState {
    pub load: LoadState,
    pub documents: Arc<[Document]>,
}
impl Default for StoreState {
    fn default() -> Self {
        Self {
            load: LoadState::NotLoaded,
            documents: Vec::new().into(),
        }
    }
}
impl StoreState {
    pub fn is_loaded(&self) -> bool {
        self.load == LoadState::Loaded
    }

    pub fn find(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|document| document.id.as_str() == id)
    }

    /// Documents whose name contains `query`, ignoring case, newest first.
    /// An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<Document> {
        let query = query.to_lowercase();
        self.documents
            .iter()
            .filter(|document| document.name.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }
}

/// The authoritative collection of [`Document`] records.
///
/// Cloning is cheap and every clone refers to the same store. Mutations are
/// applied one at a time: each one reads the latest collection, writes the
/// whole result to the slot and then publishes it to subscribers, before the
/// next mutation starts. Readers never wait on mutations.
///
/// # Examples
///
/// ```
/// use scanbox_storage::backend::LocalBackend;
/// use scanbox_store::{DocumentPatch, DocumentStore, StoreOptions};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let data = tempfile::tempdir()?;
/// # let capture = data.path().join("capture.jpg");
/// # std::fs::write(&capture, b"jpeg")?;
/// let backend = Arc::new(LocalBackend::new("local", data.path().join("store"))?);
/// let store = DocumentStore::with_backend(backend, StoreOptions::default())?;
/// store.load().await;
///
/// let invoice = store.add(&capture, Some("Invoice")).await?;
/// assert_eq!(store.documents().len(), 1);
///
/// store.update(&invoice.id, DocumentPatch::default().with_name("Paid invoice")).await;
/// assert_eq!(store.get(&invoice.id).unwrap().name, "Paid invoice");
///
/// store.delete(&invoice.id).await;
/// assert!(store.documents().is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<Inner>,
}

struct Inner {
    records: BackendHandle,
    payloads: BackendHandle,
    slot: PathBuf,
    payload_dir: PathBuf,
    payload_policy: PayloadPolicy,
    default_name: NameFormat,
    /// Held for the whole read-modify-persist of a mutation.
    mutation: Mutex<()>,
    state: watch::Sender<StoreState>,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("records", &self.inner.records.name())
            .field("payloads", &self.inner.payloads.name())
            .field("slot", &self.inner.slot)
            .field("payload_dir", &self.inner.payload_dir)
            .field("payload_policy", &self.inner.payload_policy)
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Create a store that keeps its slot on `records` and its payloads on
    /// `payloads`. Nothing is read until [`load()`](Self::load) (or the first
    /// mutation).
    ///
    /// Returns [`ErrorKind::InvalidOptions`] if the slot key or payload
    /// directory are not valid storage paths.
    pub fn new(records: BackendHandle, payloads: BackendHandle, options: StoreOptions) -> Result<Self> {
        let slot = options.slot_path()?;
        let payload_dir = options.payload_dir()?;
        let (state, _) = watch::channel(StoreState::default());
        Ok(Self {
            inner: Arc::new(Inner {
                records,
                payloads,
                slot,
                payload_dir,
                payload_policy: options.payload_policy,
                default_name: options.default_name,
                mutation: Mutex::new(()),
                state,
            }),
        })
    }

    /// Create a store that keeps both its slot and its payloads on one backend.
    pub fn with_backend(backend: BackendHandle, options: StoreOptions) -> Result<Self> {
        Self::new(backend.clone(), backend, options)
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Snapshot of the collection, newest first.
    pub fn documents(&self) -> Arc<[Document]> {
        self.inner.state.borrow().documents.clone()
    }

    pub fn get(&self, id: impl AsRef<str>) -> Option<Document> {
        self.inner.state.borrow().find(id.as_ref()).cloned()
    }

    pub fn search(&self, query: &str) -> Vec<Document> {
        self.inner.state.borrow().search(query)
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.state.borrow().is_loaded()
    }

    /// Receiver that is marked changed after every load and every mutation.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.inner.state.subscribe()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Read the collection from the slot, replacing whatever is in memory.
    ///
    /// A missing or blank slot is an empty collection. Read and decode
    /// failures are logged and also give an empty collection; they are never
    /// returned. Returns the number of documents loaded.
    #[instrument(skip(self), fields(backend = self.inner.records.name(), slot = %self.inner.slot.display()))]
    pub async fn load(&self) -> usize {
        let _guard = self.inner.mutation.lock().await;
        self.load_locked().await.len()
    }

    /// Add a newly captured image as a document.
    ///
    /// With [`PayloadPolicy::Copy`] the file at `source` is copied into the
    /// managed directory first, so the record doesn't depend on a temporary
    /// capture location. A missing or blank `name` gets the configured
    /// default name. The new document is placed first in the collection and
    /// the collection persisted.
    ///
    /// # Errors
    /// - [`ErrorKind::Payload`] if the copy fails; nothing is recorded.
    /// - [`ErrorKind::Persist`] if the slot can't be written; the copied
    ///   payload is removed again and nothing is recorded.
    /// - [`ErrorKind::DefaultName`] if the default name can't be rendered.
    #[instrument(skip(self, source, name), fields(source = %source.as_ref().display(), id))]
    pub async fn add(&self, source: impl AsRef<Path>, name: Option<&str>) -> Result<Document> {
        let source = source.as_ref();
        let _guard = self.inner.mutation.lock().await;
        let current = self.snapshot_locked().await;

        let created_at = OffsetDateTime::now_utc();
        let id = DocumentId::generate();
        tracing::Span::current().record("id", tracing::field::display(&id));
        let name = match name.filter(|name| !name.trim().is_empty()) {
            Some(name) => name.to_string(),
            None => self.inner.default_name.render(created_at)?,
        };
        let (uri, payload) = self.store_payload(source, &id, created_at).await?;

        let document = Document {
            id,
            name,
            uri,
            created_at,
            pages: 1,
            kind: DocumentKind::Scan,
        };
        let mut documents = Vec::with_capacity(current.len() + 1);
        documents.push(document.clone());
        documents.extend(current.iter().cloned());

        if let Err(err) = self.persist(&documents).await {
            if let Some(path) = payload {
                self.discard_payload(&path).await;
            }
            return Err(err);
        }
        self.publish(documents);
        tracing::info!(name = %document.name, uri = %document.uri, "Added document");
        Ok(document)
    }

    /// Merge `patch` into the document with the given id and persist the
    /// collection. Unknown ids leave the collection as it is, but it is still
    /// written back.
    ///
    /// Payloads are not touched, even if `patch` changes the `uri`; the old
    /// payload then shows up in [`orphaned_payloads()`](Self::orphaned_payloads).
    /// Persist failures are logged and the in-memory change is kept.
    ///
    /// Returns whether a document matched.
    #[instrument(skip(self, id, patch), fields(id = id.as_ref()))]
    pub async fn update(&self, id: impl AsRef<str>, patch: DocumentPatch) -> bool {
        let id = id.as_ref();
        let _guard = self.inner.mutation.lock().await;
        let mut documents = self.snapshot_locked().await.to_vec();
        let matched = match documents.iter_mut().find(|document| document.id.as_str() == id) {
            Some(document) => {
                patch.apply(document);
                true
            },
            None => {
                tracing::debug!("No document with this id; nothing to update");
                false
            },
        };
        self.commit(documents).await;
        matched
    }

    /// Delete the document with the given id, and its payload.
    ///
    /// A payload that is already gone is not an error; any other payload
    /// failure is logged and the record is removed regardless. Unknown ids
    /// leave the collection as it is, but it is still written back. Persist
    /// failures are logged and the in-memory change is kept.
    ///
    /// Returns whether a document matched.
    #[instrument(skip(self, id), fields(id = id.as_ref()))]
    pub async fn delete(&self, id: impl AsRef<str>) -> bool {
        let id = id.as_ref();
        let _guard = self.inner.mutation.lock().await;
        let current = self.snapshot_locked().await;
        if let Some(document) = current.iter().find(|document| document.id.as_str() == id) {
            self.remove_payload(document).await;
        }
        let documents: Vec<Document> = current.iter().filter(|document| document.id.as_str() != id).cloned().collect();
        let matched = documents.len() != current.len();
        if !matched {
            tracing::debug!("No document with this id; nothing to delete");
        }
        self.commit(documents).await;
        matched
    }

    /// Files in the managed directory that no document points at.
    ///
    /// Left behind by `uri` updates, interrupted deletes, or files placed
    /// there by hand. Only reports; never deletes.
    #[instrument(skip(self), fields(backend = self.inner.payloads.name()))]
    pub async fn orphaned_payloads(&self) -> Result<Vec<FileInfo>> {
        let _guard = self.inner.mutation.lock().await;
        let documents = self.snapshot_locked().await;
        let referenced: HashSet<PathBuf> =
            documents.iter().filter_map(|document| self.inner.payloads.resolve(&document.uri)).collect();
        let files = self.inner.payloads.list(Some(self.inner.payload_dir.as_path())).await.or_raise(|| ErrorKind::Payload)?;
        Ok(files.into_iter().filter(|file| !referenced.contains(&file.path)).collect())
    }

    // =========================================================================
    // Internals (callers hold the mutation lock)
    // =========================================================================

    async fn load_locked(&self) -> Arc<[Document]> {
        let documents = match self.read_slot().await {
            Ok(documents) => unique_ids(documents),
            Err(err) => {
                tracing::error!(error = ?err, "Could not load documents; continuing with an empty collection");
                Vec::new()
            },
        };
        tracing::debug!(count = documents.len(), "Loaded documents");
        self.publish(documents)
    }

    /// Current collection, loading it first if that never happened. Stops a
    /// mutation on a fresh store from overwriting the slot with a collection
    /// it never read.
    async fn snapshot_locked(&self) -> Arc<[Document]> {
        let state = self.inner.state.borrow().clone();
        match state.load {
            LoadState::Loaded => state.documents,
            LoadState::NotLoaded => self.load_locked().await,
        }
    }

    async fn read_slot(&self) -> Result<Vec<Document>> {
        let bytes = match self.inner.records.read(&self.inner.slot).await {
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            result => result.or_raise(|| ErrorKind::Load)?,
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Codec)
    }

    async fn persist(&self, documents: &[Document]) -> Result<()> {
        let json = serde_json::to_vec(documents).or_raise(|| ErrorKind::Codec)?;
        self.inner.records.write(&self.inner.slot, &json).await.or_raise(|| ErrorKind::Persist)
    }

    /// Persist, then publish whether or not the persist worked.
    async fn commit(&self, documents: Vec<Document>) {
        if let Err(err) = self.persist(&documents).await {
            tracing::error!(error = ?err, "Could not persist documents; storage is behind the in-memory collection");
        }
        self.publish(documents);
    }

    fn publish(&self, documents: Vec<Document>) -> Arc<[Document]> {
        let documents: Arc<[Document]> = documents.into();
        self.inner.state.send_replace(StoreState {
            load: LoadState::Loaded,
            documents: documents.clone(),
        });
        documents
    }

    async fn store_payload(
        &self,
        source: &Path,
        id: &DocumentId,
        created_at: OffsetDateTime,
    ) -> Result<(String, Option<PathBuf>)> {
        match self.inner.payload_policy {
            PayloadPolicy::Reference => {
                let source = std::path::absolute(source).or_raise(|| ErrorKind::Payload)?;
                Ok((source.to_string_lossy().into_owned(), None))
            },
            PayloadPolicy::Copy => {
                let path = self.inner.payload_dir.join(payload_file_name(source, id, created_at));
                self.inner.payloads.import(source, &path).await.or_raise(|| ErrorKind::Payload)?;
                let uri = self.inner.payloads.locate(&path).or_raise(|| ErrorKind::Payload)?;
                Ok((uri, Some(path)))
            },
        }
    }

    async fn remove_payload(&self, document: &Document) {
        if self.inner.payload_policy == PayloadPolicy::Reference {
            return;
        }
        // Only ever delete inside the managed directory, whatever the uri says.
        let managed = self.inner.payloads.resolve(&document.uri).filter(|path| path.starts_with(&self.inner.payload_dir));
        let Some(path) = managed else {
            tracing::debug!(uri = %document.uri, "Payload is outside managed storage; leaving it in place");
            return;
        };
        self.discard_payload(&path).await;
    }

    async fn discard_payload(&self, path: &Path) {
        match self.inner.payloads.delete(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Deleted payload"),
            Err(err) if err.is_not_found() => tracing::debug!(path = %path.display(), "Payload already gone"),
            Err(err) => tracing::error!(path = %path.display(), error = ?err, "Could not delete payload"),
        }
    }
}

/// `<unix millis>-<short id>.<ext>`, keeping the capture's extension when it
/// looks like one.
fn payload_file_name(source: &Path, id: &DocumentId, created_at: OffsetDateTime) -> String {
    let millis = created_at.unix_timestamp_nanos() / 1_000_000;
    let extension = source
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
    format!("{millis}-{}.{extension}", id.short())
}

/// Slots written with timestamp ids can hold the same id twice. Keep the
/// first (newest) record for each id.
fn unique_ids(documents: Vec<Document>) -> Vec<Document> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|document| {
            let first = seen.insert(document.id.clone());
            if !first {
                tracing::warn!(id = %document.id, "Dropping document with duplicate id");
            }
            first
        })
        .collect()
}
