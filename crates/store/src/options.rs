//! Store configuration: where records and payloads live, and how new
//! documents are named.

use crate::error::{Error, ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::{OwnedFormatItem, parse_owned};

/// Storage key of the durable slot that existing installations use.
pub const DEFAULT_SLOT_KEY: &str = "camscanner_documents";
/// Managed directory (relative to the payload backend) holding image payloads.
pub const DEFAULT_PAYLOAD_DIR: &str = "camscanner";
/// Reads like a US-locale `Scan 6/20/2024`.
pub const DEFAULT_NAME_FORMAT: &str = "Scan [month padding:none]/[day padding:none]/[year]";

/// What happens to an image payload when a document is added.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadPolicy {
    /// Copy the payload into the managed directory and delete it again with
    /// the document.
    #[default]
    #[display("copy")]
    Copy,
    /// Record the source location as-is. The store never copies or deletes
    /// payloads; for hosts without a managed filesystem.
    #[display("reference")]
    Reference,
}

/// Template for the name given to documents added without one, rendered
/// against the creation time.
#[derive(Debug, Clone)]
pub struct NameFormat {
    source: String,
    items: OwnedFormatItem,
}
impl FromStr for NameFormat {
    type Err = Error;

    /// Parses a [`time` format description](https://time-rs.github.io/book/api/format-description.html)
    /// (version 2 syntax).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let items = parse_owned::<2>(s).or_raise(|| ErrorKind::DefaultName)?;
        Ok(Self { source: s.to_string(), items })
    }
}
impl Default for NameFormat {
    fn default() -> Self {
        DEFAULT_NAME_FORMAT.parse().expect("built-in default name format must parse")
    }
}
impl PartialEq for NameFormat {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
impl NameFormat {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn render(&self, at: OffsetDateTime) -> Result<String> {
        at.format(&self.items).or_raise(|| ErrorKind::DefaultName)
    }
}

/// Where and how a [`DocumentStore`](crate::DocumentStore) keeps its data.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Name of the durable slot; stored as `<slot_key>.json`.
    pub slot_key: String,
    /// Managed directory for payloads, relative to the payload backend root.
    pub payload_dir: PathBuf,
    pub payload_policy: PayloadPolicy,
    pub default_name: NameFormat,
}
impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            slot_key: DEFAULT_SLOT_KEY.to_string(),
            payload_dir: PathBuf::from(DEFAULT_PAYLOAD_DIR),
            payload_policy: PayloadPolicy::default(),
            default_name: NameFormat::default(),
        }
    }
}
impl StoreOptions {
    pub fn with_slot_key(mut self, slot_key: impl Into<String>) -> Self {
        self.slot_key = slot_key.into();
        self
    }

    pub fn with_payload_dir(mut self, payload_dir: impl Into<PathBuf>) -> Self {
        self.payload_dir = payload_dir.into();
        self
    }

    pub fn with_payload_policy(mut self, payload_policy: PayloadPolicy) -> Self {
        self.payload_policy = payload_policy;
        self
    }

    pub fn with_default_name(mut self, default_name: NameFormat) -> Self {
        self.default_name = default_name;
        self
    }

    /// Relative path of the durable slot.
    pub(crate) fn slot_path(&self) -> Result<PathBuf> {
        if self.slot_key.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidOptions("empty slot key"));
        }
        if Path::new(&self.slot_key).has_root() {
            exn::bail!(ErrorKind::InvalidOptions("slot key must be relative"));
        }
        scanbox_storage::validate_path(format!("{}.json", self.slot_key))
            .or_raise(|| ErrorKind::InvalidOptions("slot key is not a valid storage path"))
    }

    pub(crate) fn payload_dir(&self) -> Result<PathBuf> {
        // `validate_path` would strip the root and land the payloads under the storage root.
        if self.payload_dir.has_root() {
            exn::bail!(ErrorKind::InvalidOptions("payload directory must be relative"));
        }
        scanbox_storage::validate_path(&self.payload_dir)
            .or_raise(|| ErrorKind::InvalidOptions("payload directory is not a valid storage path"))
    }
}
