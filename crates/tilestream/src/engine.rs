//! Seam to the native geodata engine.
//!
//! The engine parses raw map data into its own spatial store and, given a
//! quadkey, streams back built meshes and loaded elements. It is synchronous
//! and potentially slow, so the loader only ever calls it from blocking
//! worker threads.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use tilestream_index::QuadKey;

use crate::cancel::CancellationToken;
use crate::elevation::ElevationDataType;
use crate::record::RawRecord;

/// Where imported data is kept by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Lives for the session only.
    InMemory,
    /// Written to the engine's on-disk spatial index.
    Persistent,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::InMemory => write!(f, "in-memory"),
            StorageKind::Persistent => write!(f, "persistent"),
        }
    }
}

/// Which tiles an import applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreScope {
    /// Every tile within the levels of detail.
    Lods(RangeInclusive<u8>),
    /// One tile.
    QuadKey(QuadKey),
}

/// Reference to a stylesheet file used when building geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stylesheet {
    path: PathBuf,
}

impl Stylesheet {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parameters of a single tile decode.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub stylesheet: Stylesheet,
    pub quadkey: QuadKey,
    pub elevation: ElevationDataType,
}

/// Lazily produced records of one tile decode.
///
/// The stream is finite and consumed once. An `Err` item is terminal; an
/// exhausted stream without one means the decode succeeded.
pub type RecordStream = Box<dyn Iterator<Item = Result<RawRecord, String>> + Send>;

/// The native geodata engine.
///
/// Errors are reported as the engine's own message strings; the loader maps
/// them onto [`crate::Error`].
pub trait GeoEngine: Send + Sync + 'static {
    /// Open the engine's persistent indices.
    fn configure(&self, strings: &Path, spatial: &Path, elevation: &Path) -> Result<(), String>;

    /// Whether the spatial store already holds data for the tile.
    fn has_data(&self, quadkey: QuadKey) -> bool;

    /// Import a data file into the store.
    fn add_to_store(
        &self,
        storage: StorageKind,
        stylesheet: &Stylesheet,
        data: &Path,
        scope: &StoreScope,
    ) -> Result<(), String>;

    /// Start decoding a tile.
    ///
    /// The engine should stop yielding once `cancel` is set.
    fn load_quadkey(&self, request: &LoadRequest, cancel: &CancellationToken) -> RecordStream;

    /// Release all native resources. No other call is valid afterwards.
    fn dispose(&self);
}
