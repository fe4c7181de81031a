//! Records produced by a tile decode.
//!
//! The engine hands back flat arrays; this module turns them into typed
//! meshes and elements, projecting mesh vertices into scene space on the
//! way.

use glam::DVec3;
use tilestream_index::GeoCoordinate;

use crate::error::{Error, Result};
use crate::projection::Projection;

/// A mesh as emitted by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMesh {
    pub name: String,
    /// Flattened `(longitude, latitude, elevation)` triples.
    pub vertices: Vec<f64>,
    pub triangles: Vec<u32>,
    /// One packed `0xRRGGBBAA` colour per vertex.
    pub colors: Vec<u32>,
}

/// A map element as emitted by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawElement {
    pub id: u64,
    /// Flattened key/value pairs.
    pub tags: Vec<String>,
    /// Flattened `(longitude, latitude)` pairs.
    pub vertices: Vec<f64>,
    /// Flattened key/value pairs.
    pub styles: Vec<String>,
}

/// One item of a decode stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Mesh(RawMesh),
    Element(RawElement),
}

/// An RGBA colour with 8 bits per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Unpack a `0xRRGGBBAA` integer.
    #[must_use]
    pub fn from_packed(value: u32) -> Self {
        let [r, g, b, a] = value.to_be_bytes();
        Self { r, g, b, a }
    }
}

/// Ordered key/value attributes of an element.
///
/// Order is preserved from the engine; lookups are linear since elements
/// carry only a handful of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    /// Zip a flat `[k0, v0, k1, v1, ..]` array into pairs.
    pub fn from_flat(context: &'static str, data: Vec<String>) -> Result<Self> {
        if data.len() % 2 != 0 {
            return Err(Error::MalformedAttributeArray {
                context,
                len: data.len(),
            });
        }

        let mut pairs = Vec::with_capacity(data.len() / 2);
        let mut iter = data.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((key, value));
        }
        Ok(Self(pairs))
    }

    /// Value of the first entry with the given key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A mesh in scene space.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRecord {
    pub name: String,
    pub vertices: Vec<DVec3>,
    pub triangles: Vec<u32>,
    pub colors: Vec<Color>,
}

impl MeshRecord {
    /// Project a raw mesh through `projection`.
    pub fn from_raw(raw: RawMesh, projection: &dyn Projection) -> Result<Self> {
        if raw.vertices.len() % 3 != 0 {
            return Err(Error::MalformedGeometry {
                context: "mesh",
                len: raw.vertices.len(),
                stride: 3,
            });
        }

        let vertices = raw
            .vertices
            .chunks_exact(3)
            .map(|v| projection.project(GeoCoordinate::new(v[1], v[0]), v[2]))
            .collect();

        Ok(Self {
            name: raw.name,
            vertices,
            triangles: raw.triangles,
            colors: raw.colors.into_iter().map(Color::from_packed).collect(),
        })
    }
}

/// A map feature with geographic geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRecord {
    /// Feature id, stable across tiles.
    pub id: u64,
    pub geometry: Vec<GeoCoordinate>,
    pub tags: Attributes,
    pub styles: Attributes,
}

impl ElementRecord {
    pub fn from_raw(raw: RawElement) -> Result<Self> {
        if raw.vertices.len() % 2 != 0 {
            return Err(Error::MalformedGeometry {
                context: "element",
                len: raw.vertices.len(),
                stride: 2,
            });
        }

        let geometry = raw
            .vertices
            .chunks_exact(2)
            .map(|v| GeoCoordinate::new(v[1], v[0]))
            .collect();

        Ok(Self {
            id: raw.id,
            geometry,
            tags: Attributes::from_flat("tags", raw.tags)?,
            styles: Attributes::from_flat("styles", raw.styles)?,
        })
    }
}

/// A translated decode record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Mesh(MeshRecord),
    Element(ElementRecord),
}

impl Record {
    pub fn from_raw(raw: RawRecord, projection: &dyn Projection) -> Result<Self> {
        match raw {
            RawRecord::Mesh(mesh) => MeshRecord::from_raw(mesh, projection).map(Record::Mesh),
            RawRecord::Element(element) => ElementRecord::from_raw(element).map(Record::Element),
        }
    }
}
