//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Storage errors are kept as children
//! of these frames.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Store options don't describe usable storage locations.
    #[display("invalid store options: {_0}")]
    InvalidOptions(#[error(not(source))] &'static str),
    /// The durable slot could not be read.
    #[display("could not read document records")]
    Load,
    /// The durable slot could not be written.
    #[display("could not persist document records")]
    Persist,
    /// Records could not be encoded or decoded.
    #[display("invalid document record data")]
    Codec,
    /// The image payload could not be copied into (or listed from) managed storage.
    #[display("payload storage error")]
    Payload,
    /// The default document name could not be rendered.
    #[display("could not render default document name")]
    DefaultName,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Load | Self::Persist | Self::Payload)
    }
}
