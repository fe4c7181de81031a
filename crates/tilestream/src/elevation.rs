//! Elevation data availability.
//!
//! Before a tile is decoded with elevation, the loader makes sure the
//! elevation source covers the tile's bounding box, downloading it first if
//! needed. Flat scenes skip this stage entirely.

use std::{future::Future, pin::Pin};

use serde::Deserialize;
use tilestream_index::BoundingBox;

use crate::error::Result;

/// Which elevation source the engine should sample while building geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationDataType {
    /// No elevation, every vertex sits at height zero.
    #[default]
    Flat,
    /// SRTM height files.
    Srtm,
    /// Regular height grid.
    Grid,
}

/// Future type for elevation coverage checks.
pub type HasElevationFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

/// Future type for elevation downloads.
pub type DownloadFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A source of elevation data.
pub trait ElevationProvider: Send + Sync {
    /// Whether elevation for the whole box is already available locally.
    fn has_elevation(&self, bbox: &BoundingBox) -> HasElevationFuture<'_>;

    /// Fetch elevation for the box so later decodes can sample it.
    fn download(&self, bbox: &BoundingBox) -> DownloadFuture<'_>;
}

/// Provider for scenes without elevation.
///
/// Reports every box as covered, so nothing is ever downloaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoElevation;

impl ElevationProvider for NoElevation {
    fn has_elevation(&self, _bbox: &BoundingBox) -> HasElevationFuture<'_> {
        Box::pin(async { Ok(true) })
    }

    fn download(&self, _bbox: &BoundingBox) -> DownloadFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}
