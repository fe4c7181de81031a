//! Error types for the tilestream crate.

use std::fmt;

use tilestream_index::IndexError;

/// Result type for tilestream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming tiles.
#[derive(Debug)]
pub enum Error {
    /// Tile addressing or LOD lookup failed.
    Index(IndexError),
    /// A flat key/value array had an odd number of entries.
    MalformedAttributeArray {
        /// Which attribute set was being decoded.
        context: &'static str,
        /// Length of the offending array.
        len: usize,
    },
    /// A flat coordinate array did not divide into whole vertices.
    MalformedGeometry {
        /// Which record was being decoded.
        context: &'static str,
        /// Length of the offending array.
        len: usize,
        /// Number of values per vertex.
        stride: usize,
    },
    /// The geodata engine rejected a configuration or store import call.
    StoreConfiguration {
        /// The operation that failed.
        operation: &'static str,
        /// The message reported by the engine.
        message: String,
    },
    /// A tile load failed in the background pipeline.
    Pipeline {
        /// The quadkey of the failed tile.
        quadkey: String,
        /// The error message.
        message: String,
    },
    /// A level of detail was requested that the controller cannot serve.
    InvalidLevelOfDetails {
        /// The requested level.
        requested: u8,
        /// Why it was rejected.
        detail: String,
    },
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// Disk I/O failed.
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The path involved.
        path: String,
        /// The underlying error.
        source: std::io::Error,
    },
    /// Configuration could not be read or parsed.
    Config {
        /// The error message.
        message: String,
    },
}

impl Error {
    pub(crate) fn io(operation: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Error::Io {
            operation,
            path: path.display().to_string(),
            source,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Index(e) => write!(f, "{e}"),
            Error::MalformedAttributeArray { context, len } => {
                write!(f, "malformed {context} array: odd length {len}")
            }
            Error::MalformedGeometry {
                context,
                len,
                stride,
            } => write!(f, "malformed {context} geometry: {len} values is not a multiple of {stride}"),
            Error::StoreConfiguration { operation, message } => {
                write!(f, "store {operation} failed: {message}")
            }
            Error::Pipeline { quadkey, message } => {
                write!(f, "loading tile {quadkey} failed: {message}")
            }
            Error::InvalidLevelOfDetails { requested, detail } => {
                write!(f, "invalid level of details {requested}: {detail}")
            }
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::Io {
                operation,
                path,
                source,
            } => write!(f, "{operation} {path} failed: {source}"),
            Error::Config { message } => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Index(e) => Some(e),
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<IndexError> for Error {
    fn from(e: IndexError) -> Self {
        Error::Index(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config {
            message: e.to_string(),
        }
    }
}
