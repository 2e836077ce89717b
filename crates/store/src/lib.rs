//! Local document store for scanned pages.
//!
//! The store owns the list of [`Document`] records. The whole list lives in a
//! single JSON slot on one storage backend, and every record's image payload
//! is copied into a managed directory on another (possibly the same) backend.
//!
//! # Architecture
//! - **Records** are held in memory and rewritten to the slot as a unit after
//!   every mutation. Newest records come first.
//! - **Payloads** are copied in on [`add`](DocumentStore::add) and removed on
//!   [`delete`](DocumentStore::delete). Nothing else touches them; stray files
//!   can be found with [`orphaned_payloads`](DocumentStore::orphaned_payloads).
//! - **Readers** take snapshots or [`subscribe`](DocumentStore::subscribe) to a
//!   watch channel that is updated after every load and mutation.

pub mod error;
mod models;
mod options;
mod store;

pub use crate::models::{Document, DocumentId, DocumentKind, DocumentPatch};
pub use crate::options::{DEFAULT_NAME_FORMAT, DEFAULT_PAYLOAD_DIR, DEFAULT_SLOT_KEY, NameFormat, PayloadPolicy, StoreOptions};
pub use crate::store::{DocumentStore, LoadState, StoreState};
