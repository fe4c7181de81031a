//! Asynchronous per-tile load pipeline.
//!
//! Each tile runs through the same stages on the background runtime:
//!
//! 1. Elevation: make sure the elevation source covers the tile (skipped
//!    for flat scenes).
//! 2. Data: if the engine's store lacks the tile, import it from the disk
//!    cache, downloading it into the cache first when needed.
//! 3. Decode: stream the engine's records, translate them and forward them
//!    to the foreground in arrival order.
//!
//! Every load ends with exactly one terminal event: `Completed`, `Failed`
//! or `Cancelled`. Nothing is retried here; data written to the cache or the
//! store before a failure is kept so a later attempt can skip those stages.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tilestream_index::QuadKey;

use crate::cache::DiskCache;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::elevation::{ElevationDataType, ElevationProvider, NoElevation};
use crate::engine::{GeoEngine, LoadRequest, StorageKind, StoreScope, Stylesheet};
use crate::error::{Error, Result};
use crate::network::{HttpNetwork, Network};
use crate::projection::Projection;
use crate::record::{ElementRecord, MeshRecord, Record};
use crate::spawner::TaskSpawner;
use crate::tile::TileId;

/// Everything the pipeline needs to load one tile.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub id: TileId,
    pub quadkey: QuadKey,
    pub stylesheet: Stylesheet,
    pub elevation: ElevationDataType,
    pub projection: Arc<dyn Projection>,
}

/// Progress of one tile load.
#[derive(Debug)]
pub enum TileEvent {
    Mesh(MeshRecord),
    Element(ElementRecord),
    Completed,
    /// Always an [`Error::Pipeline`].
    Failed(Error),
    Cancelled,
}

impl TileEvent {
    /// Whether no further events follow this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TileEvent::Completed | TileEvent::Failed(_) | TileEvent::Cancelled
        )
    }
}

/// A [`TileEvent`] tagged with the load it belongs to.
#[derive(Debug)]
pub struct TileMessage {
    pub tile: TileId,
    pub quadkey: QuadKey,
    pub event: TileEvent,
}

/// Channel the pipeline reports on.
pub type EventSender = async_channel::Sender<TileMessage>;

/// How the data stage found a tile's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The file was already cached.
    Hit,
    /// The file was downloaded and persisted.
    Downloaded,
}

/// Ensure the tile's data file exists in the disk cache.
///
/// On a miss the padded bounding box is substituted into the remote query
/// and the response body is persisted verbatim.
pub async fn fetch_to_cache(
    config: &Config,
    cache: &DiskCache,
    network: &dyn Network,
    quadkey: QuadKey,
) -> Result<CacheOutcome> {
    if cache.contains(quadkey).await? {
        tracing::debug!(quadkey = %quadkey, "cache hit");
        return Ok(CacheOutcome::Hit);
    }

    let url = config.query_url_for(quadkey)?;
    tracing::warn!(quadkey = %quadkey, url, "no persistent element source found, downloading");

    let data = network.get(&url).await?;
    tracing::debug!(quadkey = %quadkey, bytes = data.len(), "saving bytes");
    cache.store(quadkey, &data).await?;

    Ok(CacheOutcome::Downloaded)
}

/// Collaborators shared by every load task.
struct Services {
    config: Config,
    engine: Arc<dyn GeoEngine>,
    network: Arc<dyn Network>,
    elevation: Arc<dyn ElevationProvider>,
    cache: DiskCache,
}

/// Loads tiles through the geodata engine.
///
/// Construction configures the engine; shutting down (or dropping the
/// loader) disposes it exactly once.
pub struct MapDataLoader {
    services: Arc<Services>,
    spawner: TaskSpawner,
    disposed: AtomicBool,
}

impl MapDataLoader {
    /// Create a loader that downloads over HTTP and has no elevation source.
    pub fn new(config: Config, engine: Arc<dyn GeoEngine>, spawner: TaskSpawner) -> Result<Self> {
        let network: Arc<dyn Network> = Arc::new(HttpNetwork::new()?);
        Self::with_services(config, engine, network, Arc::new(NoElevation), spawner)
    }

    /// Create a loader with explicit network and elevation collaborators.
    pub fn with_services(
        config: Config,
        engine: Arc<dyn GeoEngine>,
        network: Arc<dyn Network>,
        elevation: Arc<dyn ElevationProvider>,
        spawner: TaskSpawner,
    ) -> Result<Self> {
        let data = &config.data;
        engine
            .configure(&data.index.strings, &data.index.spatial, &data.elevation.local)
            .map_err(|message| {
                tracing::error!(%message, "failed to configure geodata engine");
                Error::StoreConfiguration {
                    operation: "configure",
                    message,
                }
            })?;
        tracing::info!(cache = %data.cache.display(), "configured geodata engine");

        let cache = DiskCache::from_config(&config);
        Ok(Self {
            services: Arc::new(Services {
                config,
                engine,
                network,
                elevation,
                cache,
            }),
            spawner,
            disposed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.services.config
    }

    #[must_use]
    pub fn cache(&self) -> &DiskCache {
        &self.services.cache
    }

    /// Import a data file into the engine's store.
    ///
    /// Blocks until the engine has finished the import.
    pub fn add_to_store(
        &self,
        storage: StorageKind,
        stylesheet: &Stylesheet,
        data: &Path,
        scope: &StoreScope,
    ) -> Result<()> {
        tracing::info!(
            %storage,
            data = %data.display(),
            stylesheet = %stylesheet.path().display(),
            "adding to store"
        );
        self.services
            .engine
            .add_to_store(storage, stylesheet, data, scope)
            .map_err(|message| Error::StoreConfiguration {
                operation: "import",
                message,
            })
    }

    /// Start loading a tile in the background.
    ///
    /// Events are sent on `tx`, ending with exactly one terminal event.
    pub fn load(&self, request: TileRequest, cancel: CancellationToken, tx: EventSender) {
        if self.disposed.load(Ordering::Acquire) {
            let message = TileMessage {
                tile: request.id,
                quadkey: request.quadkey,
                event: failure(
                    request.quadkey,
                    &Error::Config {
                        message: "loader has been shut down".to_string(),
                    },
                ),
            };
            let _ = tx.try_send(message);
            return;
        }

        let services = Arc::clone(&self.services);
        self.spawner.spawn(async move {
            services.run(request, cancel, tx).await;
        });
    }

    /// Dispose the engine. Later calls do nothing.
    pub fn shutdown(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.services.engine.dispose();
            tracing::info!("disposed geodata engine");
        }
    }
}

impl Drop for MapDataLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Services {
    async fn run(&self, request: TileRequest, cancel: CancellationToken, tx: EventSender) {
        let tile = request.id;
        let quadkey = request.quadkey;

        let event = match self.prepare(&request, &cancel).await {
            // A disposed tile ends cancelled even if a stage failed after it.
            _ if cancel.is_cancelled() => TileEvent::Cancelled,
            Ok(()) => self.decode(request, cancel, tx.clone()).await,
            Err(e) => failure(quadkey, &e),
        };

        match &event {
            TileEvent::Failed(e) => tracing::debug!(quadkey = %quadkey, error = %e, "tile load failed"),
            TileEvent::Cancelled => tracing::debug!(quadkey = %quadkey, "tile load cancelled"),
            _ => {}
        }

        // The receiver may be gone if the controller was dropped.
        let _ = tx.send(TileMessage {
            tile,
            quadkey,
            event,
        })
        .await;
    }

    /// Elevation and data stages. Returns early once cancellation is seen.
    async fn prepare(&self, request: &TileRequest, cancel: &CancellationToken) -> Result<()> {
        let quadkey = request.quadkey;
        tracing::debug!(quadkey = %quadkey, "loading tile");

        if request.elevation != ElevationDataType::Flat {
            let bbox = quadkey.bounding_box();
            if !self.elevation.has_elevation(&bbox).await? {
                tracing::debug!(quadkey = %quadkey, "downloading elevation");
                self.elevation.download(&bbox).await?;
            }
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let engine = Arc::clone(&self.engine);
        if blocking(quadkey, move || engine.has_data(quadkey)).await? {
            tracing::debug!(quadkey = %quadkey, "data exists in store");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        fetch_to_cache(&self.config, &self.cache, self.network.as_ref(), quadkey).await?;
        if cancel.is_cancelled() {
            return Ok(());
        }

        let engine = Arc::clone(&self.engine);
        let stylesheet = request.stylesheet.clone();
        let path = self.cache.path_for(quadkey);
        tracing::info!(quadkey = %quadkey, path = %path.display(), "importing tile data");
        blocking(quadkey, move || {
            engine.add_to_store(
                StorageKind::Persistent,
                &stylesheet,
                &path,
                &StoreScope::QuadKey(quadkey),
            )
        })
        .await?
        .map_err(|message| Error::StoreConfiguration {
            operation: "import",
            message,
        })
    }

    async fn decode(
        &self,
        request: TileRequest,
        cancel: CancellationToken,
        tx: EventSender,
    ) -> TileEvent {
        let quadkey = request.quadkey;
        let engine = Arc::clone(&self.engine);
        blocking(quadkey, move || {
            decode_stream(engine.as_ref(), &request, &cancel, &tx)
        })
        .await
        .unwrap_or_else(|e| failure(quadkey, &e))
    }
}

/// Drain the engine's record stream, forwarding translated records.
fn decode_stream(
    engine: &dyn GeoEngine,
    request: &TileRequest,
    cancel: &CancellationToken,
    tx: &EventSender,
) -> TileEvent {
    let quadkey = request.quadkey;
    let load = LoadRequest {
        stylesheet: request.stylesheet.clone(),
        quadkey,
        elevation: request.elevation,
    };

    let mut meshes = 0usize;
    let mut elements = 0usize;
    for item in engine.load_quadkey(&load, cancel) {
        if cancel.is_cancelled() {
            return TileEvent::Cancelled;
        }

        let raw = match item {
            Ok(raw) => raw,
            Err(message) => {
                return TileEvent::Failed(Error::Pipeline {
                    quadkey: quadkey.to_string(),
                    message,
                });
            }
        };
        let event = match Record::from_raw(raw, request.projection.as_ref()) {
            Ok(Record::Mesh(mesh)) => {
                meshes += 1;
                TileEvent::Mesh(mesh)
            }
            Ok(Record::Element(element)) => {
                elements += 1;
                TileEvent::Element(element)
            }
            Err(e) => return failure(quadkey, &e),
        };

        let message = TileMessage {
            tile: request.id,
            quadkey,
            event,
        };
        if tx.send_blocking(message).is_err() {
            // Nobody is listening any more.
            return TileEvent::Cancelled;
        }
    }

    if cancel.is_cancelled() {
        return TileEvent::Cancelled;
    }
    tracing::info!(quadkey = %quadkey, meshes, elements, "tile loaded");
    TileEvent::Completed
}

/// Run blocking work (disk, engine) off the async workers.
async fn blocking<F, T>(quadkey: QuadKey, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Pipeline {
            quadkey: quadkey.to_string(),
            message: format!("worker task failed: {e}"),
        })
}

fn failure(quadkey: QuadKey, error: &Error) -> TileEvent {
    match error {
        Error::Pipeline { quadkey, message } => TileEvent::Failed(Error::Pipeline {
            quadkey: quadkey.clone(),
            message: message.clone(),
        }),
        other => TileEvent::Failed(Error::Pipeline {
            quadkey: quadkey.to_string(),
            message: other.to_string(),
        }),
    }
}
