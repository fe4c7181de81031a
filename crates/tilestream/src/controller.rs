//! Streaming policy: which tiles are resident around the viewer.
//!
//! The controller is the single writer of the resident tile set. Position
//! updates decide which quadkeys to load and which to dispose; [`poll`]
//! drains pipeline events on the same foreground thread and hands records
//! to the [`ModelBuilder`].
//!
//! Two policies are supported:
//!
//! - Threshold streaming for a flat local area. The target tile is only
//!   recomputed once the viewer has moved farther than the sensitivity, far
//!   tiles are evicted by grid distance, and one neighbour is preloaded when
//!   the viewer nears an edge of the current tile.
//! - Hierarchical streaming for a globe. The viewer's tile is split into its
//!   children when the level of detail rises, merged back into its parent
//!   when it falls, and the 3x3 ring around the viewer is kept in sync while
//!   panning.
//!
//! [`poll`]: TileController::poll

use std::collections::HashMap;
use std::sync::Arc;

use glam::{DVec2, DVec3};
use tilestream_index::{GeoCoordinate, LodRangeTable, QuadKey};

use crate::config::TilingConfig;
use crate::elevation::ElevationDataType;
use crate::engine::Stylesheet;
use crate::error::{Error, Result};
use crate::loader::{MapDataLoader, TileEvent, TileMessage, TileRequest};
use crate::projection::Projection;
use crate::record::{ElementRecord, MeshRecord};
use crate::registry::{FeatureRegistry, TileScope};
use crate::tile::{LoadState, SceneRect, Tile, TileId};

/// Turns decoded records into scene content.
///
/// Returned content is owned by the tile and dropped when the tile is
/// disposed. Builders should register element ids through the scope and
/// skip features another resident tile already built.
pub trait ModelBuilder {
    type Content;

    fn build_mesh(&mut self, scope: &mut TileScope<'_>, mesh: MeshRecord) -> Option<Self::Content>;

    fn build_element(
        &mut self,
        scope: &mut TileScope<'_>,
        element: ElementRecord,
    ) -> Option<Self::Content>;
}

/// The level of detail for an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LodSignal {
    /// A level chosen by the caller.
    Level(u8),
    /// A camera distance resolved through the controller's LOD table.
    Distance(f64),
}

/// Settings of threshold streaming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// Minimum movement in scene units before the target is recomputed.
    pub sensitivity: f64,
    /// Fraction of the tile width near an edge that triggers a preload.
    pub offset: f64,
    /// Grid distance beyond which tiles are evicted.
    pub max_tile_distance: u32,
}

impl From<&TilingConfig> for ThresholdPolicy {
    fn from(config: &TilingConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            offset: config.offset,
            max_tile_distance: config.max_tile_distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamingMode {
    /// Flat local area with a fixed level of detail.
    Threshold(ThresholdPolicy),
    /// Globe with a continuously changing level of detail.
    Hierarchical,
}

/// Everything fixed for the lifetime of a controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub mode: StreamingMode,
    pub lod_table: LodRangeTable,
    pub stylesheet: Stylesheet,
    pub projection: Arc<dyn Projection>,
    pub elevation: ElevationDataType,
}

/// A slot in the tile tree.
#[derive(Debug)]
enum Node<C> {
    Resident(Tile<C>),
    /// Stands in for a tile that was split into its children.
    Placeholder,
}

/// Owns the resident tiles and drives their loading.
pub struct TileController<B: ModelBuilder> {
    loader: Arc<MapDataLoader>,
    builder: B,
    settings: ControllerSettings,
    nodes: HashMap<QuadKey, Node<B::Content>>,
    registry: FeatureRegistry,
    tx: async_channel::Sender<TileMessage>,
    rx: async_channel::Receiver<TileMessage>,
    next_id: TileId,
    current_quadkey: Option<QuadKey>,
    current_point: DVec3,
    current_position: GeoCoordinate,
    last_update: Option<DVec3>,
    fixed_lod: Option<u8>,
}

impl<B: ModelBuilder> TileController<B> {
    #[must_use]
    pub fn new(loader: Arc<MapDataLoader>, builder: B, settings: ControllerSettings) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            loader,
            builder,
            settings,
            nodes: HashMap::new(),
            registry: FeatureRegistry::new(),
            tx,
            rx,
            next_id: 1,
            current_quadkey: None,
            current_point: DVec3::ZERO,
            current_position: GeoCoordinate::default(),
            last_update: None,
            fixed_lod: None,
        }
    }

    /// The viewer moved to a scene-space point.
    pub fn on_position(&mut self, point: DVec3, lod: LodSignal) -> Result<()> {
        let coordinate = self.settings.projection.unproject(point);
        self.update(coordinate, point, lod)
    }

    /// The viewer moved to a geographic coordinate.
    pub fn on_coordinate(&mut self, coordinate: GeoCoordinate, lod: LodSignal) -> Result<()> {
        let point = self.settings.projection.project(coordinate, 0.0);
        self.update(coordinate, point, lod)
    }

    /// Hand pending pipeline events to the model builder.
    ///
    /// Events of tiles that were disposed in the meantime are dropped.
    /// Returns the number of events drained.
    pub fn poll(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(message) = self.rx.try_recv() {
            drained += 1;
            self.handle(message);
        }
        drained
    }

    /// Dispose every tile and forget the viewer's position.
    pub fn dispose(&mut self) {
        for (_, node) in self.nodes.drain() {
            if let Node::Resident(mut tile) = node {
                tile.dispose(&mut self.registry);
            }
        }
        self.current_quadkey = None;
        self.last_update = None;
        self.fixed_lod = None;
    }

    /// The resident tile under the viewer, once one is known.
    #[must_use]
    pub fn current_tile(&self) -> Option<&Tile<B::Content>> {
        self.current_quadkey.and_then(|quadkey| self.tile(quadkey))
    }

    #[must_use]
    pub fn current_quadkey(&self) -> Option<QuadKey> {
        self.current_quadkey
    }

    /// Last reported position in scene space.
    #[must_use]
    pub fn current_point(&self) -> DVec3 {
        self.current_point
    }

    /// Last reported position in geographic coordinates.
    #[must_use]
    pub fn current_position(&self) -> GeoCoordinate {
        self.current_position
    }

    #[must_use]
    pub fn tile(&self, quadkey: QuadKey) -> Option<&Tile<B::Content>> {
        match self.nodes.get(&quadkey) {
            Some(Node::Resident(tile)) => Some(tile),
            _ => None,
        }
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile<B::Content>> {
        self.nodes.values().filter_map(|node| match node {
            Node::Resident(tile) => Some(tile),
            Node::Placeholder => None,
        })
    }

    /// Keys of resident tiles, sorted.
    #[must_use]
    pub fn resident_keys(&self) -> Vec<QuadKey> {
        let mut keys: Vec<_> = self.tiles().map(Tile::quadkey).collect();
        keys.sort_unstable();
        keys
    }

    #[must_use]
    pub fn is_resident(&self, quadkey: QuadKey) -> bool {
        matches!(self.nodes.get(&quadkey), Some(Node::Resident(_)))
    }

    #[must_use]
    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    #[must_use]
    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    fn update(&mut self, coordinate: GeoCoordinate, point: DVec3, lod: LodSignal) -> Result<()> {
        let lod = self.resolve_lod(lod)?;
        self.current_point = point;
        self.current_position = coordinate;

        match self.settings.mode {
            StreamingMode::Threshold(policy) => {
                self.update_threshold(policy, coordinate, point, lod)
            }
            StreamingMode::Hierarchical => self.update_hierarchical(coordinate, lod),
        }
    }

    fn resolve_lod(&self, signal: LodSignal) -> Result<u8> {
        let table = &self.settings.lod_table;
        let lod = match signal {
            LodSignal::Level(lod) => lod,
            LodSignal::Distance(distance) => table.lookup(distance)?,
        };

        let levels = table.levels();
        if !levels.contains(&lod) {
            return Err(Error::InvalidLevelOfDetails {
                requested: lod,
                detail: format!("outside {}..={}", levels.start(), levels.end()),
            });
        }
        Ok(lod)
    }

    fn update_threshold(
        &mut self,
        policy: ThresholdPolicy,
        coordinate: GeoCoordinate,
        point: DVec3,
        lod: u8,
    ) -> Result<()> {
        if let Some(fixed) = self.fixed_lod
            && fixed != lod
        {
            return Err(Error::InvalidLevelOfDetails {
                requested: lod,
                detail: format!("threshold streaming is fixed at level {fixed}"),
            });
        }

        if let Some(last) = self.last_update
            && point.distance(last) <= policy.sensitivity
        {
            return Ok(());
        }
        self.last_update = Some(point);

        let quadkey = QuadKey::from_coordinate(coordinate, lod)?;
        self.fixed_lod = Some(lod);
        self.current_quadkey = Some(quadkey);

        self.unload_far_tiles(quadkey, policy.max_tile_distance);

        // A failed target stays resident and is not fetched again until it
        // has been evicted.
        if let Some(rect) = self.tile(quadkey).map(|tile| *tile.rect()) {
            let ground = DVec2::new(point.x, point.z);
            if !rect.contains(ground, rect.width() * policy.offset)
                && let Some(next) = next_quadkey(quadkey, &rect, ground)
                && !self.is_resident(next)
            {
                tracing::debug!(current = %quadkey, next = %next, "preloading tile");
                self.load(next);
            }
            return Ok(());
        }

        self.load(quadkey);
        Ok(())
    }

    fn unload_far_tiles(&mut self, current: QuadKey, max_tile_distance: u32) {
        let far: Vec<QuadKey> = self
            .tiles()
            .map(Tile::quadkey)
            .filter(|quadkey| quadkey.grid_distance(&current) > max_tile_distance)
            .collect();
        for quadkey in far {
            self.dispose_tile(quadkey);
        }
    }

    fn update_hierarchical(&mut self, coordinate: GeoCoordinate, lod: u8) -> Result<()> {
        let target = QuadKey::from_coordinate(coordinate, lod)?;

        if self.nodes.is_empty() {
            tracing::debug!(target = %target, "building initial tiles");
            self.load_ring(target);
        } else if let Some(actual) = self.actual_quadkey(coordinate) {
            let actual_lod = actual.level_of_detail();
            if actual_lod < lod {
                self.zoom_in(actual);
            } else if actual_lod > lod {
                self.zoom_out(actual);
            } else {
                self.reconcile_ring(target);
            }
        } else {
            // The viewer jumped outside everything resident.
            tracing::debug!(target = %target, "rebuilding tiles");
            self.dispose_residents();
            self.nodes.clear();
            self.load_ring(target);
        }

        self.prune_placeholders();
        self.current_quadkey = self.actual_quadkey(coordinate);
        Ok(())
    }

    /// The resident tile containing the coordinate, at whatever level it is.
    fn actual_quadkey(&self, coordinate: GeoCoordinate) -> Option<QuadKey> {
        self.settings
            .lod_table
            .levels()
            .filter_map(|lod| QuadKey::from_coordinate(coordinate, lod).ok())
            .find(|quadkey| self.is_resident(*quadkey))
    }

    /// Replace the viewer's tile with its four children.
    fn zoom_in(&mut self, actual: QuadKey) {
        let children = actual.children();
        if children.is_empty() {
            return;
        }
        tracing::debug!(quadkey = %actual, "zooming in");

        self.dispose_residents();
        self.nodes.insert(actual, Node::Placeholder);
        for child in children {
            self.load(child);
        }
    }

    /// Replace the viewer's tile and its siblings with their parent.
    fn zoom_out(&mut self, actual: QuadKey) {
        let Some(parent) = actual.parent() else {
            return;
        };
        tracing::debug!(quadkey = %actual, parent = %parent, "zooming out");

        self.dispose_residents();
        self.nodes.remove(&parent);
        self.load(parent);
    }

    /// Keep the 3x3 ring around `target` resident, leaving tiles that stay in
    /// the ring untouched.
    fn reconcile_ring(&mut self, target: QuadKey) {
        let ring = target.neighbors();
        let stale: Vec<QuadKey> = self
            .tiles()
            .map(Tile::quadkey)
            .filter(|quadkey| !ring.contains(quadkey))
            .collect();
        for quadkey in stale {
            self.dispose_tile(quadkey);
        }
        self.load_ring(target);
    }

    fn load_ring(&mut self, target: QuadKey) {
        for quadkey in target.neighbors() {
            self.load(quadkey);
        }
    }

    /// Drop placeholders that no longer have a resident descendant.
    fn prune_placeholders(&mut self) {
        let resident = self.resident_keys();
        self.nodes.retain(|quadkey, node| match node {
            Node::Resident(_) => true,
            Node::Placeholder => resident.iter().any(|r| quadkey.is_ancestor_of(r)),
        });
    }

    /// Start loading `quadkey` unless it is resident in any state, failed
    /// included.
    fn load(&mut self, quadkey: QuadKey) {
        if self.is_resident(quadkey) {
            tracing::debug!(quadkey = %quadkey, "tile already resident");
            return;
        }

        let id = self.next_id;
        self.next_id += 1;

        let settings = &self.settings;
        let tile = Tile::new(
            id,
            quadkey,
            settings.stylesheet.clone(),
            Arc::clone(&settings.projection),
            settings.elevation,
        );
        let request = TileRequest {
            id,
            quadkey,
            stylesheet: settings.stylesheet.clone(),
            elevation: settings.elevation,
            projection: Arc::clone(&settings.projection),
        };
        let cancel = tile.cancellation().clone();

        tracing::info!(tile = %tile, "loading tile");
        self.nodes.insert(quadkey, Node::Resident(tile));
        self.loader.load(request, cancel, self.tx.clone());
    }

    fn dispose_tile(&mut self, quadkey: QuadKey) {
        if let Some(Node::Resident(mut tile)) = self.nodes.remove(&quadkey) {
            tracing::debug!(tile = %tile, "disposing tile");
            tile.dispose(&mut self.registry);
        }
    }

    fn dispose_residents(&mut self) {
        let resident: Vec<QuadKey> = self.tiles().map(Tile::quadkey).collect();
        for quadkey in resident {
            self.dispose_tile(quadkey);
        }
    }

    fn handle(&mut self, message: TileMessage) {
        let TileMessage {
            tile: id,
            quadkey,
            event,
        } = message;

        let Some(Node::Resident(tile)) = self.nodes.get_mut(&quadkey) else {
            tracing::trace!(quadkey = %quadkey, "dropping event of disposed tile");
            return;
        };
        if tile.id() != id || tile.is_cancelled() {
            tracing::trace!(quadkey = %quadkey, "dropping event of stale load");
            return;
        }

        match event {
            TileEvent::Mesh(mesh) => {
                let projection = Arc::clone(tile.projection());
                let mut scope = TileScope::new(quadkey, projection.as_ref(), &mut self.registry);
                if let Some(content) = self.builder.build_mesh(&mut scope, mesh) {
                    tile.attach(content);
                }
            }
            TileEvent::Element(element) => {
                let projection = Arc::clone(tile.projection());
                let mut scope = TileScope::new(quadkey, projection.as_ref(), &mut self.registry);
                if let Some(content) = self.builder.build_element(&mut scope, element) {
                    tile.attach(content);
                }
            }
            TileEvent::Completed => {
                tracing::info!(tile = %tile, "tile load finished");
                tile.set_state(LoadState::Completed);
            }
            TileEvent::Failed(e) => {
                tracing::warn!(tile = %tile, error = %e, "failed to load tile");
                tile.set_state(LoadState::Failed(e.to_string()));
            }
            TileEvent::Cancelled => tile.set_state(LoadState::Cancelled),
        }
    }
}

impl<B: ModelBuilder> Drop for TileController<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The neighbour on the side of the tile the viewer is heading towards.
///
/// The tile is split into four triangles with their apex at its centre; the
/// triangle containing the viewer picks the side. Only one neighbour is ever
/// chosen, even near a corner.
fn next_quadkey(quadkey: QuadKey, rect: &SceneRect, position: DVec2) -> Option<QuadKey> {
    let center = rect.center();
    let top_left = DVec2::new(rect.left, rect.top);
    let top_right = DVec2::new(rect.right, rect.top);
    let bottom_left = DVec2::new(rect.left, rect.bottom);
    let bottom_right = DVec2::new(rect.right, rect.bottom);

    // Tile rows grow southwards while scene `z` grows northwards.
    if is_point_in_triangle(position, center, top_left, top_right) {
        quadkey.offset(0, -1)
    } else if is_point_in_triangle(position, center, top_left, bottom_left) {
        quadkey.offset(-1, 0)
    } else if is_point_in_triangle(position, center, top_right, bottom_right) {
        quadkey.offset(1, 0)
    } else {
        quadkey.offset(0, 1)
    }
}

fn is_point_in_triangle(p: DVec2, p1: DVec2, p2: DVec2, p3: DVec2) -> bool {
    let denominator = (p2.y - p3.y) * (p1.x - p3.x) + (p3.x - p2.x) * (p1.y - p3.y);
    let alpha = ((p2.y - p3.y) * (p.x - p3.x) + (p3.x - p2.x) * (p.y - p3.y)) / denominator;
    let beta = ((p3.y - p1.y) * (p.x - p3.x) + (p1.x - p3.x) * (p.y - p3.y)) / denominator;
    let gamma = 1.0 - alpha - beta;
    alpha > 0.0 && beta > 0.0 && gamma > 0.0
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::elevation::NoElevation;
    use crate::engine::GeoEngine;
    use crate::network::Network;
    use crate::projection::{CartesianProjection, SphericalProjection};
    use crate::record::{RawElement, RawMesh, RawRecord};
    use crate::spawner::TaskSpawner;
    use crate::testing::{MockEngine, MockNetwork, test_config};

    /// Builds strings and claims element ids through the registry.
    #[derive(Default)]
    struct RecordingBuilder {
        meshes: usize,
        elements: Vec<(QuadKey, u64)>,
    }

    impl ModelBuilder for RecordingBuilder {
        type Content = String;

        fn build_mesh(&mut self, _scope: &mut TileScope<'_>, mesh: MeshRecord) -> Option<String> {
            self.meshes += 1;
            Some(format!("mesh:{}", mesh.name))
        }

        fn build_element(
            &mut self,
            scope: &mut TileScope<'_>,
            element: ElementRecord,
        ) -> Option<String> {
            if !scope.register(element.id) {
                return None;
            }
            self.elements.push((scope.quadkey(), element.id));
            Some(format!("element:{}", element.id))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<MockEngine>,
        network: Arc<MockNetwork>,
        loader: Arc<MapDataLoader>,
    }

    fn records() -> Vec<RawRecord> {
        vec![
            RawRecord::Mesh(RawMesh {
                name: "terrain".to_string(),
                vertices: vec![13.4, 52.5, 0.0],
                triangles: vec![0, 0, 0],
                colors: vec![0x8080_80ff],
            }),
            RawRecord::Element(RawElement {
                id: 100,
                tags: vec!["landuse".to_string(), "forest".to_string()],
                vertices: vec![13.4, 52.5, 13.5, 52.6],
                styles: Vec::new(),
            }),
        ]
    }

    fn fixture(network: MockNetwork) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::with_records(records()));
        let network = Arc::new(network);
        let loader = MapDataLoader::with_services(
            test_config(dir.path()),
            Arc::clone(&engine) as Arc<dyn GeoEngine>,
            Arc::clone(&network) as Arc<dyn Network>,
            Arc::new(NoElevation),
            TaskSpawner::current().unwrap(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            engine,
            network,
            loader: Arc::new(loader),
        }
    }

    const LOD: u8 = 14;

    fn berlin() -> GeoCoordinate {
        // Centre of the level 14 tile containing Alexanderplatz, so the first
        // update lands well inside it.
        QuadKey::from_coordinate(GeoCoordinate::new(52.5219, 13.4132), LOD)
            .unwrap()
            .bounding_box()
            .center()
    }

    fn threshold(fixture: &Fixture, policy: ThresholdPolicy) -> TileController<RecordingBuilder> {
        TileController::new(
            Arc::clone(&fixture.loader),
            RecordingBuilder::default(),
            ControllerSettings {
                mode: StreamingMode::Threshold(policy),
                lod_table: LodRangeTable::spherical(1..=16, 6371.0).unwrap(),
                stylesheet: Stylesheet::new("default.mapcss"),
                projection: Arc::new(CartesianProjection::new(berlin())),
                elevation: ElevationDataType::Flat,
            },
        )
    }

    fn hierarchical(fixture: &Fixture) -> TileController<RecordingBuilder> {
        TileController::new(
            Arc::clone(&fixture.loader),
            RecordingBuilder::default(),
            ControllerSettings {
                mode: StreamingMode::Hierarchical,
                lod_table: LodRangeTable::spherical(1..=8, 6371.0).unwrap(),
                stylesheet: Stylesheet::new("default.mapcss"),
                projection: Arc::new(SphericalProjection::new(6371.0)),
                elevation: ElevationDataType::Flat,
            },
        )
    }

    fn default_policy() -> ThresholdPolicy {
        ThresholdPolicy::from(&TilingConfig::default())
    }

    /// Poll until no resident tile is still loading.
    async fn settle<B: ModelBuilder>(controller: &mut TileController<B>) {
        for _ in 0..500 {
            controller.poll();
            if controller
                .tiles()
                .all(|tile| tile.state() != &LoadState::Loading)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tiles did not settle");
    }

    fn keys(controller: &TileController<RecordingBuilder>) -> Vec<String> {
        let mut keys: Vec<String> = controller
            .resident_keys()
            .iter()
            .map(ToString::to_string)
            .collect();
        keys.sort();
        keys
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_update_loads_target_tile() {
        let fixture = fixture(MockNetwork::new(b"<osm/>".to_vec()));
        let mut controller = threshold(&fixture, default_policy());

        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();
        let target = QuadKey::from_coordinate(berlin(), LOD).unwrap();
        assert_eq!(controller.resident_keys(), [target]);
        assert_eq!(controller.current_quadkey(), Some(target));

        settle(&mut controller).await;
        let tile = controller.current_tile().unwrap();
        assert_eq!(tile.state(), &LoadState::Completed);
        assert_eq!(tile.content(), ["mesh:terrain", "element:100"]);
        assert_eq!(fixture.network.calls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_movement_below_sensitivity_is_ignored() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let policy = ThresholdPolicy {
            sensitivity: 1.0e7,
            ..default_policy()
        };
        let mut controller = threshold(&fixture, policy);

        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();
        let before = controller.resident_keys();

        // Several tiles away, but still within the sensitivity radius.
        let far = QuadKey::from_coordinate(berlin(), LOD)
            .unwrap()
            .offset(5, 0)
            .unwrap()
            .bounding_box()
            .center();
        controller.on_coordinate(far, LodSignal::Level(LOD)).unwrap();

        assert_eq!(controller.resident_keys(), before);
        assert_eq!(controller.current_position(), far);
        settle(&mut controller).await;
        assert_eq!(fixture.engine.loads(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_preloads_neighbour_near_edge() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let mut controller = threshold(&fixture, default_policy());
        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();
        let target = controller.current_quadkey().unwrap();
        let rect = *controller.current_tile().unwrap().rect();

        // Close to the eastern edge, inside the right-hand triangle.
        let east = DVec3::new(rect.right - rect.width() * 0.02, 0.0, rect.center().y);
        controller.on_position(east, LodSignal::Level(LOD)).unwrap();
        assert_eq!(
            controller.resident_keys(),
            [target, target.offset(1, 0).unwrap()]
        );

        // Close to the northern edge, which is the previous row.
        let north = DVec3::new(rect.center().x, 0.0, rect.top - rect.width() * 0.02);
        controller.on_position(north, LodSignal::Level(LOD)).unwrap();
        assert!(controller.is_resident(target.offset(0, -1).unwrap()));
        assert_eq!(controller.resident_keys().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_far_tiles_are_unloaded() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let mut controller = threshold(&fixture, default_policy());
        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();
        let first = controller.current_quadkey().unwrap();
        let token = controller.current_tile().unwrap().cancellation().clone();

        let next = first.offset(3, 0).unwrap();
        controller
            .on_coordinate(next.bounding_box().center(), LodSignal::Level(LOD))
            .unwrap();

        assert_eq!(controller.resident_keys(), [next]);
        assert!(token.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_threshold_level_is_fixed() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let mut controller = threshold(&fixture, default_policy());
        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();

        let error = controller
            .on_coordinate(berlin(), LodSignal::Level(LOD + 1))
            .unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidLevelOfDetails { requested: 15, .. }
        ));

        // Levels outside the table are rejected in any mode.
        let error = controller
            .on_coordinate(berlin(), LodSignal::Level(0))
            .unwrap_err();
        assert!(matches!(error, Error::InvalidLevelOfDetails { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_features_are_built_once_while_owner_is_resident() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let mut controller = threshold(&fixture, default_policy());
        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();
        settle(&mut controller).await;
        let owner = controller.current_quadkey().unwrap();

        // Preload the eastern neighbour; it reports the same element.
        let rect = *controller.current_tile().unwrap().rect();
        let east = DVec3::new(rect.right - rect.width() * 0.02, 0.0, rect.center().y);
        controller.on_position(east, LodSignal::Level(LOD)).unwrap();
        settle(&mut controller).await;

        assert_eq!(controller.builder().meshes, 2);
        assert_eq!(controller.builder().elements, [(owner, 100)]);
        assert_eq!(controller.registry().owner(100), Some(owner));

        // Once the owner is evicted, a new tile may build the feature again.
        let away = owner.offset(4, 0).unwrap();
        controller
            .on_coordinate(away.bounding_box().center(), LodSignal::Level(LOD))
            .unwrap();
        assert!(!controller.registry().contains(100));
        settle(&mut controller).await;
        assert_eq!(controller.registry().owner(100), Some(away));
        assert_eq!(controller.builder().elements.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disposed_tile_receives_no_records() {
        let fixture = fixture(MockNetwork::gated(b"<osm/>".to_vec()));
        let mut controller = threshold(&fixture, default_policy());
        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();

        fixture.network.wait_for_request().await;
        controller.dispose();
        fixture.network.release();

        // Give the pipeline time to finish and drain whatever it sent.
        tokio::time::sleep(Duration::from_millis(200)).await;
        controller.poll();

        assert!(controller.resident_keys().is_empty());
        assert_eq!(controller.builder().meshes, 0);
        assert!(controller.builder().elements.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_target_is_only_retried_after_eviction() {
        let fixture = fixture(MockNetwork::failing(503));
        let mut controller = threshold(&fixture, default_policy());
        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();
        settle(&mut controller).await;

        let tile = controller.current_tile().unwrap();
        let first_id = tile.id();
        assert!(matches!(tile.state(), LoadState::Failed(message) if message.contains("503")));
        assert!(tile.content().is_empty());

        // Recomputes that land in the same tile keep the failed load.
        let rect = *tile.rect();
        for dx in [0.2, -0.2, 0.25] {
            let moved = DVec3::new(rect.center().x + rect.width() * dx, 0.0, rect.center().y);
            controller.on_position(moved, LodSignal::Level(LOD)).unwrap();
            settle(&mut controller).await;
        }
        assert_eq!(controller.current_tile().unwrap().id(), first_id);
        assert_eq!(fixture.network.calls().len(), 1);

        // Leaving evicts the tile; coming back loads it again.
        let target = controller.current_quadkey().unwrap();
        let away = target.offset(3, 0).unwrap();
        controller
            .on_coordinate(away.bounding_box().center(), LodSignal::Level(LOD))
            .unwrap();
        settle(&mut controller).await;
        assert!(!controller.is_resident(target));

        controller
            .on_coordinate(berlin(), LodSignal::Level(LOD))
            .unwrap();
        assert_ne!(controller.current_tile().unwrap().id(), first_id);
        settle(&mut controller).await;
        assert_eq!(fixture.network.calls().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_ring_tiles_are_not_refetched() {
        let fixture = fixture(MockNetwork::failing(503));
        let mut controller = hierarchical(&fixture);
        let viewer = "012".parse::<QuadKey>().unwrap().bounding_box().center();

        controller.on_coordinate(viewer, LodSignal::Level(3)).unwrap();
        settle(&mut controller).await;
        assert_eq!(fixture.network.calls().len(), 9);
        let ids: Vec<_> = controller.tiles().map(|tile| (tile.quadkey(), tile.id())).collect();
        assert!(
            controller
                .tiles()
                .all(|tile| matches!(tile.state(), LoadState::Failed(_)))
        );

        for _ in 0..3 {
            controller.on_coordinate(viewer, LodSignal::Level(3)).unwrap();
            settle(&mut controller).await;
        }

        assert_eq!(fixture.network.calls().len(), 9);
        for (quadkey, id) in ids {
            assert_eq!(controller.tile(quadkey).unwrap().id(), id);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hierarchical_zoom_in_and_out() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let mut controller = hierarchical(&fixture);
        let parent: QuadKey = "012".parse().unwrap();
        let viewer = parent.bounding_box().center();

        controller.on_coordinate(viewer, LodSignal::Level(3)).unwrap();
        assert_eq!(controller.resident_keys().len(), 9);
        assert!(controller.is_resident(parent));
        assert_eq!(controller.current_quadkey(), Some(parent));
        settle(&mut controller).await;

        controller.on_coordinate(viewer, LodSignal::Level(4)).unwrap();
        assert_eq!(keys(&controller), ["0120", "0121", "0122", "0123"]);
        let children: Vec<_> = parent
            .children()
            .iter()
            .map(|child| controller.tile(*child).unwrap().cancellation().clone())
            .collect();

        controller.on_coordinate(viewer, LodSignal::Level(3)).unwrap();
        assert_eq!(keys(&controller), ["012"]);
        assert!(children.iter().all(|token| token.is_cancelled()));

        settle(&mut controller).await;
        assert_eq!(
            controller.tile(parent).unwrap().state(),
            &LoadState::Completed
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hierarchical_pan_keeps_shared_tiles() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let mut controller = hierarchical(&fixture);
        let start: QuadKey = "012".parse().unwrap();

        controller
            .on_coordinate(start.bounding_box().center(), LodSignal::Level(3))
            .unwrap();
        let shared = start.offset(1, 0).unwrap();
        let shared_id = controller.tile(shared).unwrap().id();

        let east = start.offset(1, 0).unwrap();
        controller
            .on_coordinate(east.bounding_box().center(), LodSignal::Level(3))
            .unwrap();

        let mut expected = east.neighbors();
        expected.sort_unstable();
        assert_eq!(controller.resident_keys(), expected);
        assert_eq!(controller.tile(shared).unwrap().id(), shared_id);
        assert!(!controller.is_resident(start.offset(-1, 0).unwrap()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hierarchical_lod_from_distance() {
        let fixture = fixture(MockNetwork::new(Vec::new()));
        let mut controller = hierarchical(&fixture);

        // Two globe diameters out resolves to the coarsest level.
        controller
            .on_coordinate(GeoCoordinate::new(10.0, 10.0), LodSignal::Distance(20_000.0))
            .unwrap();
        assert!(
            controller
                .resident_keys()
                .iter()
                .all(|key| key.level_of_detail() == 1)
        );
    }
}
