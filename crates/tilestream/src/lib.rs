//! Streams map tiles into a 3D scene.
//!
//! A [`TileController`] receives the viewer's position and a level-of-detail
//! signal, decides which quadkeys should be resident, and starts loading them
//! through a [`MapDataLoader`]. Each load runs on the async runtime:
//!
//! 1. Download elevation for the tile's bounds when the tile uses elevation.
//! 2. Skip straight to decoding if the [`GeoEngine`] already stores the tile.
//! 3. Otherwise fetch the tile's raw data into the [`DiskCache`], downloading
//!    it from the configured server on a miss, and import it into the engine.
//! 4. Decode the tile's records on a blocking thread and send them back.
//!
//! Records arrive over a channel and are handed to a [`ModelBuilder`] when the
//! foreground calls [`TileController::poll`], so scene content is only ever
//! touched from one thread. Disposing a tile cancels its pipeline, and a
//! [`FeatureRegistry`] keeps features that span several tiles from being
//! built twice.

mod cache;
mod cancel;
pub mod config;
mod controller;
mod elevation;
mod engine;
mod error;
mod loader;
mod network;
pub mod projection;
pub mod record;
mod registry;
mod spawner;
mod tile;

#[cfg(test)]
mod testing;

pub use cache::DiskCache;
pub use cancel::CancellationToken;
pub use config::{Config, TilingConfig};
pub use controller::{
    ControllerSettings, LodSignal, ModelBuilder, StreamingMode, ThresholdPolicy, TileController,
};
pub use elevation::{
    DownloadFuture, ElevationDataType, ElevationProvider, HasElevationFuture, NoElevation,
};
pub use engine::{GeoEngine, LoadRequest, RecordStream, StorageKind, StoreScope, Stylesheet};
pub use error::{Error, Result};
pub use loader::{
    CacheOutcome, EventSender, MapDataLoader, TileEvent, TileMessage, TileRequest, fetch_to_cache,
};
pub use network::{FetchFuture, HttpNetwork, Network};
pub use projection::{CartesianProjection, Projection, ScaledProjection, SphericalProjection};
pub use record::{ElementRecord, MeshRecord, RawRecord, Record};
pub use registry::{FeatureRegistry, TileScope};
pub use spawner::TaskSpawner;
pub use tile::{LoadState, SceneRect, Tile, TileId};

pub use tilestream_index;
