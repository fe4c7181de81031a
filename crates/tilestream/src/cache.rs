//! On-disk cache of downloaded tile data.
//!
//! Each tile's response body is stored verbatim as
//! `<root>/<quadkey><extension>`, where the engine can import it directly.
//! Files are never evicted; a later session reuses them instead of hitting
//! the network.

use std::path::{Path, PathBuf};

use tilestream_index::QuadKey;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};

/// Directory of cached tile files.
///
/// All writes go through one lock per cache, so two loads racing on the same
/// tile cannot interleave their writes.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    extension: String,
    write_lock: Mutex<()>,
}

impl DiskCache {
    /// Create a cache rooted at `root`. `extension` includes the leading dot.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.data.cache.clone(), config.format_extension())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache file for a tile.
    #[must_use]
    pub fn path_for(&self, quadkey: QuadKey) -> PathBuf {
        self.root.join(format!("{quadkey}{}", self.extension))
    }

    /// Whether a cache file exists for the tile.
    pub async fn contains(&self, quadkey: QuadKey) -> Result<bool> {
        let path = self.path_for(quadkey);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::io("stat", &path, e))
    }

    /// Persist a tile's data unless another writer got there first.
    ///
    /// Returns `true` if this call wrote the file.
    pub async fn store(&self, quadkey: QuadKey, data: &[u8]) -> Result<bool> {
        let path = self.path_for(quadkey);
        let _guard = self.write_lock.lock().await;

        // Re-check under the lock: a concurrent load may have written it.
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::io("stat", &path, e))?
        {
            tracing::debug!(quadkey = %quadkey, "cache file already written");
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::io("create", &self.root, e))?;

        // A partially written file must never be mistaken for a cache hit.
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, data)
            .await
            .map_err(|e| Error::io("write", &partial, e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| Error::io("rename", &partial, e))?;

        tracing::debug!(quadkey = %quadkey, bytes = data.len(), "saved tile data");
        Ok(true)
    }
}
