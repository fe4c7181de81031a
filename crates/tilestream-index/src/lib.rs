//! Tile addressing and level-of-detail resolution for map streaming.
//!
//! This crate holds the pure, synchronous half of tile streaming: naming
//! tiles with quadkeys, deriving their geographic bounds and relatives, and
//! turning a camera distance into a level of detail. Nothing here performs
//! I/O, so every function can be called from any thread.
//!
//! # Example
//!
//! ```
//! use tilestream_index::{GeoCoordinate, LodRangeTable, QuadKey};
//!
//! let key = QuadKey::from_coordinate(GeoCoordinate::new(52.52, 13.40), 3).unwrap();
//! assert_eq!(key.to_string().len(), 3);
//! assert_eq!(key.children().len(), 4);
//!
//! let table = LodRangeTable::spherical(1..=8, 6371.0).unwrap();
//! assert_eq!(table.lookup(20_000.0).unwrap(), 1);
//! ```

mod error;
pub mod geo;
mod lod_range;
mod quadkey;

pub use error::{IndexError, IndexResult};
pub use geo::{BoundingBox, GeoCoordinate};
pub use lod_range::{LodInterval, LodRangeTable, PlanarFrustum};
pub use quadkey::{QuadKey, grid_size};

/// Coarsest supported level of detail.
pub const MIN_LEVEL_OF_DETAIL: u8 = 1;

/// Finest supported level of detail.
pub const MAX_LEVEL_OF_DETAIL: u8 = 16;
