//! Document records as they are held in memory and persisted to the slot.
//!
//! The JSON shape (`camelCase` keys, `type` for the kind, RFC 3339
//! timestamps) is the one existing slots were written with, so those slots
//! load unchanged.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque, unique identifier of a [`Document`].
///
/// Freshly generated ids are random UUIDs. Ids read back from storage are
/// kept verbatim, whatever their shape.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);
impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, enough to tell payload files apart.
    pub(crate) fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}
impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Captured with the camera. Every document created by the store is a scan.
    #[default]
    #[display("scan")]
    Scan,
    #[display("pdf")]
    Pdf,
}

/// Metadata of one scanned document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    /// User-editable display label.
    pub name: String,
    /// Location reference of the image payload.
    pub uri: String,
    /// Set once at creation.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub pages: u32,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
}

/// Partial update of a [`Document`]: every field that is `Some` replaces the
/// current value, everything else is left alone.
///
/// `id` and `created_at` are deliberately absent; neither may change after
/// creation.
///
/// ```
/// use scanbox_store::DocumentPatch;
///
/// let patch = DocumentPatch::default().with_name("Invoice").with_pages(2);
/// assert!(!patch.is_empty());
/// assert!(DocumentPatch::default().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentPatch {
    pub name: Option<String>,
    pub uri: Option<String>,
    pub pages: Option<u32>,
    pub kind: Option<DocumentKind>,
}
impl DocumentPatch {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_pages(mut self, pages: u32) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.uri.is_none() && self.pages.is_none() && self.kind.is_none()
    }

    pub(crate) fn apply(&self, document: &mut Document) {
        if let Some(name) = &self.name {
            document.name.clone_from(name);
        }
        if let Some(uri) = &self.uri {
            document.uri.clone_from(uri);
        }
        if let Some(pages) = self.pages {
            document.pages = pages;
        }
        if let Some(kind) = self.kind {
            document.kind = kind;
        }
    }
}
