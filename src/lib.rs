//! In-memory 3D scene graph for component models, with a binary cache
//! codec and a VRML2.0 text exporter.
//!
//! The graph ([`sg`]) is a tree of Transform, Shape and FaceSet nodes
//! over leaf data lists (coordinates, normals, colors, triangle indices,
//! appearance). Nodes owned elsewhere can be attached by reference, so
//! identical geometry and materials are stored once and shared.
//!
//! - [`cache`] reads and writes the binary cache format, linearizing
//!   shared structure so references always resolve while streaming;
//! - [`vrml`] exports a tree as VRML2.0 with `DEF`/`USE` sharing;
//! - [`prepare`] flattens a tree into renderer-ready triangle meshes.
//!
//! ```no_run
//! use sg3d::sg::{NodeKind, Scene};
//!
//! # fn main() -> sg3d::Result<()> {
//! let mut scene = Scene::new();
//! let root = scene.new_node(NodeKind::Transform, None)?;
//! let shape = scene.new_node(NodeKind::Shape, Some(root))?;
//! let fs = scene.new_node(NodeKind::FaceSet, Some(shape))?;
//! let coords = scene.new_node(NodeKind::Coords, Some(fs))?;
//! scene.coords_mut(coords).add_point(0.0, 0.0, 0.0);
//! scene.coords_mut(coords).add_point(1.0, 0.0, 0.0);
//! scene.coords_mut(coords).add_point(0.0, 1.0, 0.0);
//! let index = scene.new_node(NodeKind::CoordIndex, Some(fs))?;
//! scene.coord_index_mut(index).add_triangle(0, 1, 2);
//!
//! sg3d::write_cache(&mut scene, root, "part.sg3d".as_ref())?;
//! sg3d::write_vrml(&mut scene, root, "part.wrl".as_ref(), true)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod prepare;
pub mod sg;
pub mod util;
pub mod vrml;

pub use cache::{read_cache, write_cache};
pub use prepare::{prepare, Model, TriangleMesh};
pub use sg::{NodeId, NodeKind, Scene, Wrapper};
pub use util::{Error, Result};
pub use vrml::write_vrml;
