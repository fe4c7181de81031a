//! Geographic coordinates, bounding boxes and distance helpers.

use std::fmt;

use glam::DVec2;

/// Mean Earth radius in meters, used for distances and local plane mapping.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinate {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6},{:.6})", self.latitude, self.longitude)
    }
}

/// Axis-aligned geographic rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: GeoCoordinate,
    pub max: GeoCoordinate,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(min: GeoCoordinate, max: GeoCoordinate) -> Self {
        Self { min, max }
    }

    /// Grow the box by `padding` degrees on every side.
    ///
    /// Remote queries use a small padding so neighbouring tiles overlap and
    /// no seam is left between them.
    #[must_use]
    pub fn padded(&self, padding: f64) -> Self {
        Self {
            min: GeoCoordinate::new(self.min.latitude - padding, self.min.longitude - padding),
            max: GeoCoordinate::new(self.max.latitude + padding, self.max.longitude + padding),
        }
    }

    #[must_use]
    pub fn center(&self) -> GeoCoordinate {
        GeoCoordinate::new(
            (self.min.latitude + self.max.latitude) / 2.0,
            (self.min.longitude + self.max.longitude) / 2.0,
        )
    }

    /// Whether the coordinate lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, coordinate: GeoCoordinate) -> bool {
        coordinate.latitude >= self.min.latitude
            && coordinate.latitude <= self.max.latitude
            && coordinate.longitude >= self.min.longitude
            && coordinate.longitude <= self.max.longitude
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max.longitude - self.min.longitude
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max.latitude - self.min.latitude
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.min, self.max)
    }
}

/// Great-circle distance between two coordinates in meters (haversine).
#[must_use]
pub fn distance(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Map a coordinate onto a local plane centred at `origin`.
///
/// The returned point is in meters with `x` pointing east and `y` north.
/// Accuracy degrades with distance from the origin, which is fine for the
/// few kilometres a planar scene spans.
#[must_use]
pub fn to_map_coordinate(origin: GeoCoordinate, coordinate: GeoCoordinate) -> DVec2 {
    let x = (coordinate.longitude - origin.longitude).to_radians()
        * EARTH_RADIUS
        * origin.latitude.to_radians().cos();
    let y = (coordinate.latitude - origin.latitude).to_radians() * EARTH_RADIUS;
    DVec2::new(x, y)
}

/// Inverse of [`to_map_coordinate`].
#[must_use]
pub fn to_geo_coordinate(origin: GeoCoordinate, point: DVec2) -> GeoCoordinate {
    let latitude = origin.latitude + (point.y / EARTH_RADIUS).to_degrees();
    let longitude = origin.longitude
        + (point.x / (EARTH_RADIUS * origin.latitude.to_radians().cos())).to_degrees();
    GeoCoordinate::new(latitude, longitude)
}
