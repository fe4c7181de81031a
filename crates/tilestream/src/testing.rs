//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tilestream_index::{BoundingBox, QuadKey};
use tokio::sync::Notify;

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::elevation::{DownloadFuture, ElevationProvider, HasElevationFuture};
use crate::engine::{GeoEngine, LoadRequest, RecordStream, StorageKind, StoreScope, Stylesheet};
use crate::error::Error;
use crate::network::{FetchFuture, Network};
use crate::record::RawRecord;

pub fn test_config(cache_root: &Path) -> Config {
    let mut config = Config::default();
    config.data.remote.server = "http://tiles.test/api?".to_string();
    config.data.remote.query = "bbox={1},{0},{3},{2}".to_string();
    config.data.cache = cache_root.to_path_buf();
    config
}

/// Engine that replays the same records for every tile.
#[derive(Default)]
pub struct MockEngine {
    records: Vec<RawRecord>,
    decode_error: Option<String>,
    configure_error: Option<String>,
    cancel_at: Option<usize>,
    cancel_on_lookup: Mutex<Option<CancellationToken>>,
    stored: Mutex<HashSet<QuadKey>>,
    imports: Mutex<Vec<(PathBuf, StoreScope)>>,
    loads: AtomicUsize,
    disposals: AtomicUsize,
}

impl MockEngine {
    pub fn with_records(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn fail_after_records(&mut self, message: &str) {
        self.decode_error = Some(message.to_string());
    }

    pub fn fail_configure(&mut self, message: &str) {
        self.configure_error = Some(message.to_string());
    }

    /// Cancel the load's token just before the record at `index` is yielded.
    pub fn cancel_while_yielding(&mut self, index: usize) {
        self.cancel_at = Some(index);
    }

    /// Cancel `token` when the pipeline asks whether the tile is stored.
    pub fn cancel_on_lookup(&self, token: CancellationToken) {
        *self.cancel_on_lookup.lock().unwrap() = Some(token);
    }

    pub fn mark_stored(&self, quadkey: QuadKey) {
        self.stored.lock().unwrap().insert(quadkey);
    }

    pub fn imports(&self) -> Vec<(PathBuf, StoreScope)> {
        self.imports.lock().unwrap().clone()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

impl GeoEngine for MockEngine {
    fn configure(&self, _strings: &Path, _spatial: &Path, _elevation: &Path) -> Result<(), String> {
        match &self.configure_error {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }

    fn has_data(&self, quadkey: QuadKey) -> bool {
        if let Some(token) = self.cancel_on_lookup.lock().unwrap().as_ref() {
            token.cancel();
        }
        self.stored.lock().unwrap().contains(&quadkey)
    }

    fn add_to_store(
        &self,
        _storage: StorageKind,
        _stylesheet: &Stylesheet,
        data: &Path,
        scope: &StoreScope,
    ) -> Result<(), String> {
        self.imports
            .lock()
            .unwrap()
            .push((data.to_path_buf(), scope.clone()));
        if let StoreScope::QuadKey(quadkey) = scope {
            self.mark_stored(*quadkey);
        }
        Ok(())
    }

    fn load_quadkey(&self, _request: &LoadRequest, cancel: &CancellationToken) -> RecordStream {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let records = self.records.clone().into_iter().map(Ok);
        let stream = records.chain(self.decode_error.clone().map(Err));
        match self.cancel_at {
            Some(index) => {
                let cancel = cancel.clone();
                Box::new(stream.enumerate().map(move |(i, item)| {
                    if i == index {
                        cancel.cancel();
                    }
                    item
                }))
            }
            None => Box::new(stream),
        }
    }

    fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

/// Network that records requests and returns a fixed body or status.
#[derive(Default)]
pub struct MockNetwork {
    body: Vec<u8>,
    status: Option<u16>,
    gated: bool,
    calls: Mutex<Vec<String>>,
    requested: Notify,
    gate: Notify,
}

impl MockNetwork {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Requests block until [`MockNetwork::release`] is called.
    pub fn gated(body: Vec<u8>) -> Self {
        Self {
            body,
            gated: true,
            ..Self::default()
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Like [`MockNetwork::gated`], but the released request fails.
    pub fn gated_failing(status: u16) -> Self {
        Self {
            status: Some(status),
            gated: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for_request(&self) {
        self.requested.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl Network for MockNetwork {
    fn get(&self, url: &str) -> FetchFuture<'_> {
        self.calls.lock().unwrap().push(url.to_string());
        let url = url.to_string();
        Box::pin(async move {
            self.requested.notify_one();
            if self.gated {
                self.gate.notified().await;
            }
            match self.status {
                Some(status) => Err(Error::HttpStatus { url, status }),
                None => Ok(self.body.clone()),
            }
        })
    }
}

/// Elevation source that never has data and counts calls.
#[derive(Default)]
pub struct MockElevation {
    pub checks: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl ElevationProvider for MockElevation {
    fn has_elevation(&self, _bbox: &BoundingBox) -> HasElevationFuture<'_> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(false) })
    }

    fn download(&self, _bbox: &BoundingBox) -> DownloadFuture<'_> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
