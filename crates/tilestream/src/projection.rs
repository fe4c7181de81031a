//! Mapping between geographic coordinates and scene space.
//!
//! Scene space is y-up. Planar scenes put east on `x` and north on `z`;
//! spherical scenes centre the globe on the origin.

use std::fmt::Debug;

use glam::{DVec2, DVec3};
use tilestream_index::GeoCoordinate;
use tilestream_index::geo::{to_geo_coordinate, to_map_coordinate};

/// Converts between geographic coordinates and scene-space points.
pub trait Projection: Debug + Send + Sync {
    /// Project a coordinate at `height` meters above the reference surface.
    fn project(&self, coordinate: GeoCoordinate, height: f64) -> DVec3;

    /// Recover the coordinate under a scene-space point, ignoring height.
    fn unproject(&self, point: DVec3) -> GeoCoordinate;
}

/// Local tangent plane anchored at a world origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartesianProjection {
    origin: GeoCoordinate,
}

impl CartesianProjection {
    /// Create a projection with `origin` at scene `(0, 0, 0)`.
    #[must_use]
    pub fn new(origin: GeoCoordinate) -> Self {
        Self { origin }
    }

    #[must_use]
    pub fn origin(&self) -> GeoCoordinate {
        self.origin
    }
}

impl Projection for CartesianProjection {
    fn project(&self, coordinate: GeoCoordinate, height: f64) -> DVec3 {
        let point = to_map_coordinate(self.origin, coordinate);
        DVec3::new(point.x, height, point.y)
    }

    fn unproject(&self, point: DVec3) -> GeoCoordinate {
        to_geo_coordinate(self.origin, DVec2::new(point.x, point.z))
    }
}

/// Uniformly scales the output of another projection.
///
/// Useful when the scene works in units other than meters, such as a
/// miniature table-top map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledProjection<P> {
    inner: P,
    scale: f64,
}

impl<P: Projection> ScaledProjection<P> {
    #[must_use]
    pub fn new(inner: P, scale: f64) -> Self {
        Self { inner, scale }
    }
}

impl<P: Projection> Projection for ScaledProjection<P> {
    fn project(&self, coordinate: GeoCoordinate, height: f64) -> DVec3 {
        self.inner.project(coordinate, height) * self.scale
    }

    fn unproject(&self, point: DVec3) -> GeoCoordinate {
        self.inner.unproject(point / self.scale)
    }
}

/// Projection onto a sphere centred at the scene origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalProjection {
    radius: f64,
}

impl SphericalProjection {
    #[must_use]
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }

    #[must_use]
    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Projection for SphericalProjection {
    fn project(&self, coordinate: GeoCoordinate, height: f64) -> DVec3 {
        let radius = self.radius + height;
        let lat = coordinate.latitude.to_radians();
        let lon = coordinate.longitude.to_radians();

        // The polar axis is scene `y`.
        DVec3::new(
            radius * lat.cos() * lon.cos(),
            radius * lat.sin(),
            radius * lat.cos() * lon.sin(),
        )
    }

    fn unproject(&self, point: DVec3) -> GeoCoordinate {
        let length = point.length();
        if length == 0.0 {
            return GeoCoordinate::default();
        }
        let latitude = (point.y / length).clamp(-1.0, 1.0).asin().to_degrees();
        let longitude = point.z.atan2(point.x).to_degrees();
        GeoCoordinate::new(latitude, longitude)
    }
}
