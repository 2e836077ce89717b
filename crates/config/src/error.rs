//! Config Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested config file does not exist.
    #[display("config file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The config file extension isn't one of `toml`, `yaml`, `yml` or `json`.
    #[display("unsupported config file format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// The merged sources don't deserialize into a [`Config`](crate::Config).
    #[display("could not parse configuration")]
    Parse,
    /// A value parsed but is unusable.
    #[display("invalid `{field}`: {reason}")]
    Invalid {
        #[error(not(source))]
        field: &'static str,
        #[error(not(source))]
        reason: &'static str,
    },
    /// No data directory was configured and the platform has no default.
    #[display("no data directory configured and no platform default available")]
    NoDataDir,
}
