//! Leaf data nodes: coordinate, normal, color and index lists, plus the
//! surface appearance record.
//!
//! These are pure data containers; they accept no children and no
//! references. Coordinates and normals are stored in double precision to
//! match the transform pipeline; colors are f32 triples as consumed by the
//! renderer.

use glam::{DVec3, Vec3};

/// Vertex coordinate list (millimetres).
#[derive(Clone, Debug, Default)]
pub struct CoordsData {
    pub points: Vec<DVec3>,
}

impl CoordsData {
    /// Append one coordinate.
    pub fn add_point(&mut self, x: f64, y: f64, z: f64) {
        self.points.push(DVec3::new(x, y, z));
    }
}

/// Per-vertex normal list (unit vectors).
#[derive(Clone, Debug, Default)]
pub struct NormalsData {
    pub vectors: Vec<DVec3>,
}

impl NormalsData {
    /// Append one normal; the vector is normalized on insertion.
    pub fn add_vector(&mut self, x: f64, y: f64, z: f64) {
        self.vectors
            .push(DVec3::new(x, y, z).normalize_or(DVec3::Z));
    }
}

/// Per-vertex color list (linear RGB, 0..1).
#[derive(Clone, Debug, Default)]
pub struct ColorsData {
    pub colors: Vec<Vec3>,
}

impl ColorsData {
    /// Append one RGB color.
    pub fn add_color(&mut self, r: f32, g: f32, b: f32) {
        self.colors.push(Vec3::new(r, g, b));
    }
}

/// Triangle vertex index list; every three consecutive entries form one
/// triangle.
#[derive(Clone, Debug, Default)]
pub struct CoordIndexData {
    pub indices: Vec<i32>,
}

impl CoordIndexData {
    /// Append one triangle.
    pub fn add_triangle(&mut self, a: i32, b: i32, c: i32) {
        self.indices.extend_from_slice(&[a, b, c]);
    }
}

/// Surface material, VRML2.0 `Material` fields.
#[derive(Clone, Debug, PartialEq)]
pub struct AppearanceData {
    pub ambient: f32,
    pub diffuse: Vec3,
    pub emissive: Vec3,
    pub specular: Vec3,
    pub shininess: f32,
    pub transparency: f32,
}

impl Default for AppearanceData {
    /// VRML2.0 `Material` defaults.
    fn default() -> Self {
        AppearanceData {
            ambient: 0.2,
            diffuse: Vec3::splat(0.8),
            emissive: Vec3::ZERO,
            specular: Vec3::ZERO,
            shininess: 0.2,
            transparency: 0.0,
        }
    }
}
