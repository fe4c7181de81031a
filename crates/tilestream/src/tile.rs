//! A tile that is loading or resident in the scene.

use std::fmt;
use std::sync::Arc;

use glam::DVec2;
use tilestream_index::{BoundingBox, QuadKey};

use crate::cancel::CancellationToken;
use crate::elevation::ElevationDataType;
use crate::engine::Stylesheet;
use crate::projection::Projection;
use crate::registry::FeatureRegistry;

/// Identifies one load of a tile.
///
/// A quadkey that is evicted and later reloaded gets a new id, so events
/// from the earlier load can be told apart and dropped.
pub type TileId = u64;

/// Where a tile is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Completed,
    /// The pipeline failed with the given message.
    Failed(String),
    /// Disposed before the pipeline finished.
    Cancelled,
}

/// Axis-aligned rectangle of a tile on the scene's ground plane (`x`, `z`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneRect {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl SceneRect {
    /// Project a bounding box onto the ground plane.
    #[must_use]
    pub fn from_bbox(bbox: &BoundingBox, projection: &dyn Projection) -> Self {
        let a = projection.project(bbox.min, 0.0);
        let b = projection.project(bbox.max, 0.0);
        Self {
            left: a.x.min(b.x),
            bottom: a.z.min(b.z),
            right: a.x.max(b.x),
            top: a.z.max(b.z),
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    #[must_use]
    pub fn center(&self) -> DVec2 {
        DVec2::new(
            (self.left + self.right) / 2.0,
            (self.bottom + self.top) / 2.0,
        )
    }

    /// Whether `point` lies strictly inside the rectangle shrunk by `offset`
    /// on every side.
    #[must_use]
    pub fn contains(&self, point: DVec2, offset: f64) -> bool {
        point.x > self.left + offset
            && point.x < self.right - offset
            && point.y > self.bottom + offset
            && point.y < self.top - offset
    }
}

/// One quadkey's load and its attached scene content.
///
/// Exactly one `Tile` exists per resident quadkey. Dropping the content
/// detaches it from the scene.
#[derive(Debug)]
pub struct Tile<C> {
    id: TileId,
    quadkey: QuadKey,
    bbox: BoundingBox,
    rect: SceneRect,
    stylesheet: Stylesheet,
    projection: Arc<dyn Projection>,
    elevation: ElevationDataType,
    content: Vec<C>,
    state: LoadState,
    cancel: CancellationToken,
}

impl<C> Tile<C> {
    #[must_use]
    pub fn new(
        id: TileId,
        quadkey: QuadKey,
        stylesheet: Stylesheet,
        projection: Arc<dyn Projection>,
        elevation: ElevationDataType,
    ) -> Self {
        let bbox = quadkey.bounding_box();
        let rect = SceneRect::from_bbox(&bbox, projection.as_ref());
        Self {
            id,
            quadkey,
            bbox,
            rect,
            stylesheet,
            projection,
            elevation,
            content: Vec::new(),
            state: LoadState::Loading,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TileId {
        self.id
    }

    #[must_use]
    pub fn quadkey(&self) -> QuadKey {
        self.quadkey
    }

    #[must_use]
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    #[must_use]
    pub fn rect(&self) -> &SceneRect {
        &self.rect
    }

    #[must_use]
    pub fn stylesheet(&self) -> &Stylesheet {
        &self.stylesheet
    }

    #[must_use]
    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    #[must_use]
    pub fn elevation(&self) -> ElevationDataType {
        self.elevation
    }

    #[must_use]
    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Scene content built for this tile so far.
    #[must_use]
    pub fn content(&self) -> &[C] {
        &self.content
    }

    /// Token shared with the tile's load pipeline.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn attach(&mut self, content: C) {
        self.content.push(content);
    }

    pub(crate) fn set_state(&mut self, state: LoadState) {
        self.state = state;
    }

    /// Stop the pipeline, release owned feature ids and drop the content.
    pub fn dispose(&mut self, registry: &mut FeatureRegistry) {
        self.cancel.cancel();
        registry.release(self.quadkey);
        self.content.clear();
        if self.state == LoadState::Loading {
            self.state = LoadState::Cancelled;
        }
    }
}

impl<C> fmt::Display for Tile<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{}:{})",
            self.quadkey.tile_x(),
            self.quadkey.tile_y(),
            self.quadkey
        )
    }
}
