//! Error types for addressing and LOD lookups.

use std::fmt;

/// Errors that can occur while addressing tiles or resolving levels of detail.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexError {
    /// A quadkey string could not be parsed.
    MalformedKey { key: String, detail: &'static str },
    /// A LOD lookup was given a distance that is not a number.
    InvalidDistance { value: f64 },
    /// A level of detail is outside the supported range.
    InvalidLevelOfDetail { level: u8 },
    /// A LOD range table could not be built from the given intervals or
    /// geometry.
    InvalidLodRange { detail: String },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedKey { key, detail } => {
                write!(f, "malformed quadkey '{key}': {detail}")
            }
            Self::InvalidDistance { value } => {
                write!(f, "invalid distance for lod lookup: {value}")
            }
            Self::InvalidLevelOfDetail { level } => {
                write!(
                    f,
                    "unsupported level of detail {level} (expected 1..={})",
                    crate::MAX_LEVEL_OF_DETAIL
                )
            }
            Self::InvalidLodRange { detail } => write!(f, "invalid lod range: {detail}"),
        }
    }
}

impl std::error::Error for IndexError {}

/// Result type for addressing operations.
pub type IndexResult<T> = Result<T, IndexError>;
