//! Distance to level-of-detail resolution.
//!
//! A [`LodRangeTable`] partitions the real line into half-open intervals
//! `[start, end)`, each tagged with a level of detail. The outermost
//! intervals are unbounded, so every finite or infinite distance resolves to
//! exactly one level. Levels never increase with distance: the farther the
//! viewer, the coarser the tiles.
//!
//! Two builders exist:
//!
//! - [`LodRangeTable::planar`]: thresholds from a perspective frustum looking
//!   down onto a flat map, sized so a 3x3 block of tiles fills the view.
//! - [`LodRangeTable::spherical`]: thresholds packed by Fibonacci ratios of
//!   the sphere radius, denser near the surface.

use std::ops::RangeInclusive;

use crate::error::{IndexError, IndexResult};
use crate::geo::{self, GeoCoordinate};
use crate::quadkey::QuadKey;
use crate::{MAX_LEVEL_OF_DETAIL, MIN_LEVEL_OF_DETAIL};

/// Share of the viewport a 3x3 tile block should cover.
const SIZE_RATIO: f64 = 0.75;

/// Vertical field of view used with spherical tables, in degrees.
const SPHERICAL_FIELD_OF_VIEW: f64 = 60.0;

/// One interval of a [`LodRangeTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodInterval {
    /// Inclusive lower bound (may be `-inf`).
    pub start: f64,
    /// Exclusive upper bound (may be `+inf`).
    pub end: f64,
    pub level_of_detail: u8,
}

impl LodInterval {
    fn contains(&self, distance: f64) -> bool {
        distance >= self.start && (distance < self.end || self.end == f64::INFINITY)
    }
}

/// Camera geometry for a planar table.
#[derive(Debug, Clone, Copy)]
pub struct PlanarFrustum {
    /// Geographic point the scene is centred on.
    pub origin: GeoCoordinate,
    /// Viewport width divided by height.
    pub aspect: f64,
    /// Scene units per meter.
    pub scale: f64,
    /// Camera distance at which the coarsest level starts.
    pub max_distance: f64,
}

/// Immutable lookup table from a distance signal to a level of detail.
#[derive(Debug, Clone, PartialEq)]
pub struct LodRangeTable {
    /// Sorted by ascending `start`.
    intervals: Vec<LodInterval>,
    field_of_view: f64,
}

impl LodRangeTable {
    /// Build a table from explicit intervals.
    ///
    /// The intervals must be contiguous, cover the whole real line and carry
    /// non-increasing levels as distance grows.
    pub fn from_intervals(
        mut intervals: Vec<LodInterval>,
        field_of_view: f64,
    ) -> IndexResult<Self> {
        if intervals.is_empty() {
            return Err(invalid("table has no intervals"));
        }
        intervals.sort_by(|a, b| a.start.total_cmp(&b.start));

        let first = intervals[0];
        let last = intervals[intervals.len() - 1];
        if first.start != f64::NEG_INFINITY || last.end != f64::INFINITY {
            return Err(invalid("intervals do not cover the whole line"));
        }

        for interval in &intervals {
            if interval.start.is_nan() || interval.end.is_nan() || interval.start >= interval.end {
                return Err(invalid(format!(
                    "empty interval [{}, {})",
                    interval.start, interval.end
                )));
            }
            check_level(interval.level_of_detail)?;
        }

        for pair in intervals.windows(2) {
            let (near, far) = (pair[0], pair[1]);
            if near.end != far.start {
                return Err(invalid(format!(
                    "gap or overlap between {} and {}",
                    near.end, far.start
                )));
            }
            if far.level_of_detail > near.level_of_detail {
                return Err(invalid(format!(
                    "level {} is farther than level {}",
                    far.level_of_detail, near.level_of_detail
                )));
            }
        }

        Ok(Self {
            intervals,
            field_of_view,
        })
    }

    /// Build a table for a flat map seen through a perspective camera.
    ///
    /// The field of view is chosen so that at `max_distance` a 3x3 block of
    /// tiles at the coarsest level fills the viewport; every finer level gets
    /// the distance at which its own 3x3 block fills the same view.
    pub fn planar(levels: RangeInclusive<u8>, frustum: &PlanarFrustum) -> IndexResult<Self> {
        let (min_lod, max_lod) = check_levels(&levels)?;
        if !(frustum.max_distance.is_finite() && frustum.max_distance > 0.0) {
            return Err(invalid("max distance must be positive"));
        }
        if !(frustum.aspect > 0.0 && frustum.scale > 0.0) {
            return Err(invalid("aspect and scale must be positive"));
        }

        let aspect_ratio = SIZE_RATIO * if frustum.aspect > 1.0 { 1.0 / frustum.aspect } else { 1.0 };
        let frustum_height = |lod: u8| -> IndexResult<f64> {
            let key = QuadKey::from_coordinate(frustum.origin, lod)?;
            Ok(grid_size(key, frustum.scale) * aspect_ratio)
        };

        let fov = 2.0 * (frustum_height(min_lod)? * 0.5 / frustum.max_distance).atan();

        let mut intervals = vec![LodInterval {
            start: frustum.max_distance,
            end: f64::INFINITY,
            level_of_detail: min_lod,
        }];
        let mut far = frustum.max_distance;
        for lod in min_lod + 1..=max_lod {
            let near = frustum_height(lod)? * 0.5 / (fov * 0.5).tan();
            intervals.push(LodInterval {
                start: near,
                end: far,
                level_of_detail: lod - 1,
            });
            far = near;
        }
        intervals.push(LodInterval {
            start: f64::NEG_INFINITY,
            end: far,
            level_of_detail: max_lod,
        });

        Self::from_intervals(intervals, fov.to_degrees())
    }

    /// Build a table for a globe of the given radius, keyed by the camera's
    /// distance to the globe centre.
    ///
    /// Level 1 covers one to two diameters away; below that each level's
    /// band shrinks following `fib(n) / (fib(n) + 1)`, so transitions get
    /// denser as the camera approaches the surface.
    pub fn spherical(levels: RangeInclusive<u8>, radius: f64) -> IndexResult<Self> {
        let (min_lod, max_lod) = check_levels(&levels)?;
        if !(radius.is_finite() && radius > 0.0) {
            return Err(invalid("radius must be positive"));
        }

        let base = 2.0 * radius;
        let mut intervals: Vec<LodInterval> = (min_lod..=max_lod)
            .map(|lod| {
                let (start, end) = match lod {
                    1 => (base, 2.0 * base),
                    2 => (base - radius / 3.0, base),
                    _ => {
                        let upper = if lod == 3 {
                            1.0 / 3.0
                        } else {
                            fibonacci_ratio(lod - 1)
                        };
                        (base - radius * fibonacci_ratio(lod), base - radius * upper)
                    }
                };
                LodInterval {
                    start,
                    end,
                    level_of_detail: lod,
                }
            })
            .collect();

        // Open both ends so every distance resolves.
        if let Some(coarsest) = intervals.first_mut() {
            coarsest.end = f64::INFINITY;
        }
        if let Some(finest) = intervals.last_mut() {
            finest.start = f64::NEG_INFINITY;
        }

        Self::from_intervals(intervals, SPHERICAL_FIELD_OF_VIEW)
    }

    /// Resolve a distance to its level of detail.
    pub fn lookup(&self, distance: f64) -> IndexResult<u8> {
        if distance.is_nan() {
            return Err(IndexError::InvalidDistance { value: distance });
        }
        self.intervals
            .iter()
            .find(|interval| interval.contains(distance))
            .map(|interval| interval.level_of_detail)
            .ok_or(IndexError::InvalidDistance { value: distance })
    }

    /// Intervals sorted by ascending distance.
    #[must_use]
    pub fn intervals(&self) -> &[LodInterval] {
        &self.intervals
    }

    /// Vertical field of view the table was built for, in degrees.
    #[must_use]
    pub fn field_of_view(&self) -> f64 {
        self.field_of_view
    }

    /// Smallest and largest finite threshold, if the table has any.
    #[must_use]
    pub fn finite_bounds(&self) -> Option<(f64, f64)> {
        let mut thresholds = self
            .intervals
            .iter()
            .flat_map(|interval| [interval.start, interval.end])
            .filter(|value| value.is_finite());
        let first = thresholds.next()?;
        Some(thresholds.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    /// Coarsest and finest level in the table.
    #[must_use]
    pub fn levels(&self) -> RangeInclusive<u8> {
        let finest = self.intervals[0].level_of_detail;
        let coarsest = self.intervals[self.intervals.len() - 1].level_of_detail;
        coarsest..=finest
    }
}

/// Width in scene units of a 3x3 block of tiles centred on `key`.
fn grid_size(key: QuadKey, scale: f64) -> f64 {
    let bbox = key.bounding_box();
    let width = bbox.width();
    let min = GeoCoordinate::new(bbox.min.latitude, bbox.min.longitude - width);
    let max = GeoCoordinate::new(bbox.min.latitude, bbox.max.longitude + width);
    geo::distance(min, max) * scale
}

fn fibonacci_ratio(n: u8) -> f64 {
    let fib = f64::from(fibonacci(n));
    fib / (fib + 1.0)
}

fn fibonacci(n: u8) -> u32 {
    let (mut a, mut b) = (0u32, 1u32);
    for _ in 0..n {
        (a, b) = (b, a + b);
    }
    a
}

fn check_level(level: u8) -> IndexResult<()> {
    if (MIN_LEVEL_OF_DETAIL..=MAX_LEVEL_OF_DETAIL).contains(&level) {
        Ok(())
    } else {
        Err(IndexError::InvalidLevelOfDetail { level })
    }
}

fn check_levels(levels: &RangeInclusive<u8>) -> IndexResult<(u8, u8)> {
    let (min, max) = (*levels.start(), *levels.end());
    check_level(min)?;
    check_level(max)?;
    if min > max {
        return Err(invalid(format!("empty level range {min}..={max}")));
    }
    Ok((min, max))
}

fn invalid(detail: impl Into<String>) -> IndexError {
    IndexError::InvalidLodRange {
        detail: detail.into(),
    }
}
