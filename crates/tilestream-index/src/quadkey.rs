//! Quadkey addressing over the Web-Mercator tile pyramid.
//!
//! A quadkey names one node of the global quadtree: level `n` splits the
//! world into `2^n x 2^n` tiles. The string form has one base-4 digit per
//! level, where each digit packs one bit of the tile x (`+1`) and one bit of
//! the tile y (`+2`), most significant level first.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{IndexError, IndexResult};
use crate::geo::{BoundingBox, GeoCoordinate};
use crate::{MAX_LEVEL_OF_DETAIL, MIN_LEVEL_OF_DETAIL};

/// Latitude limit of the Web-Mercator projection.
const MAX_LATITUDE: f64 = 85.051_128_78;

/// Offsets of the neighbour ring, starting with the key itself and walking
/// around it. Callers rely on this order for deterministic build order.
const RING: [(i64, i64); 9] = [
    (0, 0),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
];

/// Address of a single tile: `(tile_x, tile_y, level_of_detail)`.
///
/// Always valid: `1 <= level_of_detail <= MAX_LEVEL_OF_DETAIL` and both tile
/// indices lie in `[0, 2^level_of_detail)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadKey {
    level_of_detail: u8,
    tile_x: u32,
    tile_y: u32,
}

impl QuadKey {
    /// Create a quadkey, validating the level and tile indices.
    pub fn new(tile_x: u32, tile_y: u32, level_of_detail: u8) -> IndexResult<Self> {
        if !(MIN_LEVEL_OF_DETAIL..=MAX_LEVEL_OF_DETAIL).contains(&level_of_detail) {
            return Err(IndexError::InvalidLevelOfDetail {
                level: level_of_detail,
            });
        }
        let size = grid_size(level_of_detail);
        if tile_x >= size || tile_y >= size {
            return Err(IndexError::MalformedKey {
                key: format!("({tile_x},{tile_y}:{level_of_detail})"),
                detail: "tile index outside of grid",
            });
        }
        Ok(Self {
            level_of_detail,
            tile_x,
            tile_y,
        })
    }

    /// The key of the tile containing `coordinate` at the given level.
    ///
    /// Latitudes beyond the Mercator limit and longitudes outside
    /// `[-180, 180]` are clamped onto the edge tiles.
    pub fn from_coordinate(coordinate: GeoCoordinate, level_of_detail: u8) -> IndexResult<Self> {
        if !(MIN_LEVEL_OF_DETAIL..=MAX_LEVEL_OF_DETAIL).contains(&level_of_detail) {
            return Err(IndexError::InvalidLevelOfDetail {
                level: level_of_detail,
            });
        }
        Ok(Self {
            level_of_detail,
            tile_x: lon_to_tile_x(coordinate.longitude, level_of_detail),
            tile_y: lat_to_tile_y(coordinate.latitude, level_of_detail),
        })
    }

    #[must_use]
    pub fn tile_x(&self) -> u32 {
        self.tile_x
    }

    #[must_use]
    pub fn tile_y(&self) -> u32 {
        self.tile_y
    }

    #[must_use]
    pub fn level_of_detail(&self) -> u8 {
        self.level_of_detail
    }

    /// Geographic bounds of the tile.
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        let lod = self.level_of_detail;
        BoundingBox::new(
            GeoCoordinate::new(
                tile_y_to_lat(self.tile_y + 1, lod),
                tile_x_to_lon(self.tile_x, lod),
            ),
            GeoCoordinate::new(
                tile_y_to_lat(self.tile_y, lod),
                tile_x_to_lon(self.tile_x + 1, lod),
            ),
        )
    }

    /// The enclosing tile one level up, or `None` at the top level.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.level_of_detail <= MIN_LEVEL_OF_DETAIL {
            return None;
        }
        Some(Self {
            level_of_detail: self.level_of_detail - 1,
            tile_x: self.tile_x >> 1,
            tile_y: self.tile_y >> 1,
        })
    }

    /// The ancestor (or self) at `level_of_detail`, if it is not deeper than
    /// this key.
    #[must_use]
    pub fn ancestor(&self, level_of_detail: u8) -> Option<Self> {
        if level_of_detail < MIN_LEVEL_OF_DETAIL || level_of_detail > self.level_of_detail {
            return None;
        }
        let shift = self.level_of_detail - level_of_detail;
        Some(Self {
            level_of_detail,
            tile_x: self.tile_x >> shift,
            tile_y: self.tile_y >> shift,
        })
    }

    /// The four tiles one level down, in digit order `0, 1, 2, 3`.
    ///
    /// At the deepest supported level there is nothing to subdivide into, so
    /// the result is empty.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        if self.level_of_detail >= MAX_LEVEL_OF_DETAIL {
            return Vec::new();
        }
        (0..4u32)
            .map(|digit| Self {
                level_of_detail: self.level_of_detail + 1,
                tile_x: (self.tile_x << 1) | (digit & 1),
                tile_y: (self.tile_y << 1) | (digit >> 1),
            })
            .collect()
    }

    /// The tile `dx` columns and `dy` rows away on the same level.
    ///
    /// Columns wrap around the antimeridian; rows past the poles do not
    /// exist and yield `None`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn offset(&self, dx: i64, dy: i64) -> Option<Self> {
        let size = i64::from(grid_size(self.level_of_detail));
        let y = i64::from(self.tile_y) + dy;
        if !(0..size).contains(&y) {
            return None;
        }
        let x = (i64::from(self.tile_x) + dx).rem_euclid(size);
        Some(Self {
            level_of_detail: self.level_of_detail,
            tile_x: x as u32,
            tile_y: y as u32,
        })
    }

    /// The key itself followed by its 8-connected ring.
    ///
    /// Away from the grid edges this is exactly nine keys in a fixed order.
    /// Near the poles the missing rows are skipped, and on tiny grids where
    /// wrapping folds the ring onto itself duplicates are dropped.
    #[must_use]
    pub fn neighbors(&self) -> Vec<Self> {
        let mut keys: Vec<Self> = Vec::with_capacity(RING.len());
        for (dx, dy) in RING {
            if let Some(key) = self.offset(dx, dy)
                && !keys.contains(&key)
            {
                keys.push(key);
            }
        }
        keys
    }

    /// Manhattan distance in tiles to another key on the same level.
    #[must_use]
    pub fn grid_distance(&self, other: &Self) -> u32 {
        self.tile_x.abs_diff(other.tile_x) + self.tile_y.abs_diff(other.tile_y)
    }

    /// Whether `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.level_of_detail < other.level_of_detail
            && other.ancestor(self.level_of_detail) == Some(*self)
    }
}

impl fmt::Display for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use fmt::Write;

        for i in (1..=self.level_of_detail).rev() {
            let mask = 1u32 << (i - 1);
            let mut digit = b'0';
            if self.tile_x & mask != 0 {
                digit += 1;
            }
            if self.tile_y & mask != 0 {
                digit += 2;
            }
            f.write_char(digit as char)?;
        }
        Ok(())
    }
}

impl FromStr for QuadKey {
    type Err = IndexError;

    fn from_str(s: &str) -> IndexResult<Self> {
        if s.is_empty() {
            return Err(IndexError::MalformedKey {
                key: String::new(),
                detail: "empty key",
            });
        }
        let Ok(level_of_detail) = u8::try_from(s.len()) else {
            return Err(IndexError::MalformedKey {
                key: s.to_string(),
                detail: "key is too long",
            });
        };
        if level_of_detail > MAX_LEVEL_OF_DETAIL {
            return Err(IndexError::MalformedKey {
                key: s.to_string(),
                detail: "key is too long",
            });
        }

        let mut tile_x = 0u32;
        let mut tile_y = 0u32;
        for c in s.bytes() {
            let digit = match c {
                b'0'..=b'3' => u32::from(c - b'0'),
                _ => {
                    return Err(IndexError::MalformedKey {
                        key: s.to_string(),
                        detail: "digits must be 0-3",
                    });
                }
            };
            tile_x = (tile_x << 1) | (digit & 1);
            tile_y = (tile_y << 1) | (digit >> 1);
        }

        Ok(Self {
            level_of_detail,
            tile_x,
            tile_y,
        })
    }
}

/// Number of tiles along one axis at the given level.
#[must_use]
pub fn grid_size(level_of_detail: u8) -> u32 {
    1 << level_of_detail
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lon_to_tile_x(longitude: f64, level_of_detail: u8) -> u32 {
    let size = f64::from(grid_size(level_of_detail));
    let x = ((longitude + 180.0) / 360.0 * size).floor();
    x.clamp(0.0, size - 1.0) as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lat_to_tile_y(latitude: f64, level_of_detail: u8) -> u32 {
    let size = f64::from(grid_size(level_of_detail));
    let lat = latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * size).floor();
    y.clamp(0.0, size - 1.0) as u32
}

fn tile_x_to_lon(tile_x: u32, level_of_detail: u8) -> f64 {
    f64::from(tile_x) / f64::from(grid_size(level_of_detail)) * 360.0 - 180.0
}

fn tile_y_to_lat(tile_y: u32, level_of_detail: u8) -> f64 {
    let n = PI - 2.0 * PI * f64::from(tile_y) / f64::from(grid_size(level_of_detail));
    n.sinh().atan().to_degrees()
}
