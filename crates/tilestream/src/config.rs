//! Session configuration.
//!
//! The configuration is a JSON document whose nesting mirrors the key paths
//! the loader and controller read (`data/remote/server`, `tiling/offset`, and
//! so on). Every section has defaults, so a partial document is valid.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tilestream_index::{BoundingBox, QuadKey};

use crate::elevation::ElevationDataType;
use crate::error::{Error, Result};

/// Padding in degrees added around a tile's bounding box for remote queries.
pub const QUERY_PADDING: f64 = 0.001;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub tiling: TilingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub remote: RemoteConfig,
    /// Directory holding downloaded tile files.
    pub cache: PathBuf,
    pub index: IndexConfig,
    pub elevation: ElevationConfig,
}

/// Remote tile-data endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL the escaped query is appended to.
    pub server: String,
    /// Query template with `{0}`..`{3}` standing for min latitude, min
    /// longitude, max latitude and max longitude.
    pub query: String,
    /// Response format, also used as the cache file extension.
    pub format: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            query: String::new(),
            format: "xml".to_string(),
        }
    }
}

/// Paths of the engine's persistent indices.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub strings: PathBuf,
    pub spatial: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ElevationConfig {
    pub local: PathBuf,
    #[serde(rename = "type")]
    pub data_type: ElevationDataType,
}

/// Streaming policy knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Minimum viewer movement, in scene units, before the target tile is
    /// recomputed.
    pub sensitivity: f64,
    /// Fraction of the tile size near an edge that triggers a preload.
    pub offset: f64,
    /// Manhattan grid distance beyond which resident tiles are evicted.
    pub max_tile_distance: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            sensitivity: 30.0,
            offset: 0.1,
            max_tile_distance: 2,
        }
    }
}

impl Config {
    /// Parse a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        let tiling = &self.tiling;
        if tiling.sensitivity.is_nan() || tiling.sensitivity < 0.0 {
            return Err(Error::Config {
                message: format!("tiling.sensitivity must be non-negative, got {}", tiling.sensitivity),
            });
        }
        if !(0.0..=0.5).contains(&tiling.offset) {
            return Err(Error::Config {
                message: format!("tiling.offset must be within [0, 0.5], got {}", tiling.offset),
            });
        }
        Ok(())
    }

    /// Cache file extension including the leading dot.
    #[must_use]
    pub fn format_extension(&self) -> String {
        format!(".{}", self.data.remote.format)
    }

    /// Build the remote URL for a tile's padded bounding box.
    pub fn query_url(&self, bbox: &BoundingBox) -> Result<String> {
        let remote = &self.data.remote;
        if remote.server.is_empty() || remote.query.is_empty() {
            return Err(Error::Config {
                message: "data.remote.server and data.remote.query are required for downloads"
                    .to_string(),
            });
        }

        let padded = bbox.padded(QUERY_PADDING);
        let query = [
            padded.min.latitude,
            padded.min.longitude,
            padded.max.latitude,
            padded.max.longitude,
        ]
        .iter()
        .enumerate()
        .fold(remote.query.clone(), |query, (index, value)| {
            query.replace(&format!("{{{index}}}"), &value.to_string())
        });

        Ok(format!("{}{}", remote.server, urlencoding::encode(&query)))
    }

    /// Remote URL for a quadkey's tile.
    pub fn query_url_for(&self, quadkey: QuadKey) -> Result<String> {
        self.query_url(&quadkey.bounding_box())
    }
}
