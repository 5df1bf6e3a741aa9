//! Cache deserialization.
//!
//! Records are read in the exact order the writer emits them, so by the
//! time a reference name appears its target is already in the tree and a
//! plain name lookup resolves it. Any failure destroys the partially
//! built subtree before returning, leaving the scene as it was.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use glam::DVec3;
use log::debug;

use crate::sg::{AxisAngle, NodeId, NodeKind, Scene};
use crate::util::{Error, Result};

use super::stream::IStream;
use super::{CACHE_MAGIC, CACHE_VERSION, MAX_ITEMS};

/// Load a cache file into the scene, returning the root Transform.
pub fn read_cache(scene: &mut Scene, path: &Path) -> Result<NodeId> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    let mut inp = IStream::new(BufReader::new(file));

    let mut magic = [0u8; 8];
    inp.read_bytes(&mut magic)?;
    if &magic != CACHE_MAGIC {
        return Err(Error::InvalidMagic);
    }

    let version = inp.read_u32()?;
    if version != CACHE_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let (pos, name) = inp.read_tag()?;
    if tag_kind(pos, &name)? != NodeKind::Transform {
        return Err(Error::TagMismatch {
            pos,
            expected: NodeKind::Transform.tag_prefix(),
            actual: name,
        });
    }

    let root = scene.new_node(NodeKind::Transform, None)?;
    scene.set_name(root, &name);

    match read_transform(scene, root, &mut inp) {
        Ok(()) => Ok(root),
        Err(e) => {
            debug!("cache read failed, discarding partial tree: {}", e);
            scene.destroy(root);
            Err(e)
        }
    }
}

/// Recover the node kind from a serialized name like `TXFM_1`.
fn tag_kind(pos: u64, name: &str) -> Result<NodeKind> {
    let prefix = name.split('_').next().unwrap_or(name);
    NodeKind::from_tag_prefix(prefix).ok_or_else(|| {
        Error::invalid(format!("unknown node tag '{}' at position {}", name, pos))
    })
}

fn read_count<R: Read>(inp: &mut IStream<R>) -> Result<u32> {
    let n = inp.read_u32()?;
    if n > MAX_ITEMS {
        return Err(Error::invalid(format!(
            "item count {} at position {} exceeds limit",
            n,
            inp.pos() - 4
        )));
    }
    Ok(n)
}

fn read_vec3<R: Read>(inp: &mut IStream<R>) -> Result<DVec3> {
    let x = inp.read_f64()?;
    let y = inp.read_f64()?;
    let z = inp.read_f64()?;
    Ok(DVec3::new(x, y, z))
}

fn read_rotation<R: Read>(inp: &mut IStream<R>) -> Result<AxisAngle> {
    let axis = read_vec3(inp)?;
    let angle = inp.read_f64()?;
    Ok(AxisAngle::new(axis, angle))
}

/// Read one owned child record of the expected kind.
fn read_node<R: Read>(
    scene: &mut Scene,
    parent: NodeId,
    expected: NodeKind,
    inp: &mut IStream<R>,
) -> Result<NodeId> {
    let (pos, name) = inp.read_tag()?;
    let kind = tag_kind(pos, &name)?;
    if kind != expected {
        return Err(Error::TagMismatch {
            pos,
            expected: expected.tag_prefix(),
            actual: name,
        });
    }

    let id = scene.new_node(kind, Some(parent))?;
    scene.set_name(id, &name);

    match kind {
        NodeKind::Transform => read_transform(scene, id, inp)?,
        NodeKind::Shape => read_shape(scene, id, inp)?,
        NodeKind::FaceSet => read_faceset(scene, id, inp)?,
        NodeKind::Coords => read_coords(scene, id, inp)?,
        NodeKind::Normals => read_normals(scene, id, inp)?,
        NodeKind::Colors => read_colors(scene, id, inp)?,
        NodeKind::CoordIndex => read_coord_index(scene, id, inp)?,
        NodeKind::Appearance => read_appearance(scene, id, inp)?,
    }
    Ok(id)
}

/// Resolve a reference name against the tree built so far and attach it.
fn resolve_ref<R: Read>(
    scene: &mut Scene,
    node: NodeId,
    expected: NodeKind,
    inp: &mut IStream<R>,
) -> Result<()> {
    let name = inp.read_string()?;

    let Some(target) = scene.find_node(node, &name, Some(node)) else {
        return Err(Error::UnresolvedRef(name));
    };

    let actual = scene.kind(target);
    if actual != expected {
        return Err(Error::KindMismatch {
            name,
            expected: expected.name(),
            actual: actual.name(),
        });
    }

    if !scene.add_ref_node(node, target) {
        return Err(Error::invalid(format!(
            "cannot attach reference '{}': slot already occupied",
            name
        )));
    }
    Ok(())
}

fn read_transform<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let n_transforms = read_count(inp)?;
    let n_ref_transforms = read_count(inp)?;
    let n_shapes = read_count(inp)?;
    let n_ref_shapes = read_count(inp)?;

    let center = read_vec3(inp)?;
    let translation = read_vec3(inp)?;
    let rotation = read_rotation(inp)?;
    let scale = read_vec3(inp)?;
    let scale_orientation = read_rotation(inp)?;

    {
        let d = scene.transform_mut(node);
        d.center = center;
        d.translation = translation;
        d.rotation = rotation;
        d.scale = scale;
        d.scale_orientation = scale_orientation;
    }

    for _ in 0..n_transforms {
        read_node(scene, node, NodeKind::Transform, inp)?;
    }
    for _ in 0..n_ref_transforms {
        resolve_ref(scene, node, NodeKind::Transform, inp)?;
    }
    for _ in 0..n_shapes {
        read_node(scene, node, NodeKind::Shape, inp)?;
    }
    for _ in 0..n_ref_shapes {
        resolve_ref(scene, node, NodeKind::Shape, inp)?;
    }
    Ok(())
}

fn read_shape<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let has_appearance = inp.read_flag()?;
    let has_ref_appearance = inp.read_flag()?;
    let has_faceset = inp.read_flag()?;
    let has_ref_faceset = inp.read_flag()?;

    if has_appearance {
        read_node(scene, node, NodeKind::Appearance, inp)?;
    }
    if has_ref_appearance {
        resolve_ref(scene, node, NodeKind::Appearance, inp)?;
    }
    if has_faceset {
        read_node(scene, node, NodeKind::FaceSet, inp)?;
    }
    if has_ref_faceset {
        resolve_ref(scene, node, NodeKind::FaceSet, inp)?;
    }
    Ok(())
}

fn read_faceset<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let has_coords = inp.read_flag()?;
    let has_ref_coords = inp.read_flag()?;
    let has_index = inp.read_flag()?;
    let has_normals = inp.read_flag()?;
    let has_ref_normals = inp.read_flag()?;
    let has_colors = inp.read_flag()?;
    let has_ref_colors = inp.read_flag()?;

    if has_coords {
        read_node(scene, node, NodeKind::Coords, inp)?;
    }
    if has_ref_coords {
        resolve_ref(scene, node, NodeKind::Coords, inp)?;
    }
    if has_index {
        read_node(scene, node, NodeKind::CoordIndex, inp)?;
    }
    if has_normals {
        read_node(scene, node, NodeKind::Normals, inp)?;
    }
    if has_ref_normals {
        resolve_ref(scene, node, NodeKind::Normals, inp)?;
    }
    if has_colors {
        read_node(scene, node, NodeKind::Colors, inp)?;
    }
    if has_ref_colors {
        resolve_ref(scene, node, NodeKind::Colors, inp)?;
    }
    Ok(())
}

fn read_coords<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let count = read_count(inp)?;
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        points.push(read_vec3(inp)?);
    }
    scene.coords_mut(node).points = points;
    Ok(())
}

fn read_normals<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let count = read_count(inp)?;
    let mut vectors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        vectors.push(read_vec3(inp)?);
    }
    scene.normals_mut(node).vectors = vectors;
    Ok(())
}

fn read_colors<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let count = read_count(inp)?;
    let mut colors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let r = inp.read_f32()?;
        let g = inp.read_f32()?;
        let b = inp.read_f32()?;
        colors.push(glam::Vec3::new(r, g, b));
    }
    scene.colors_mut(node).colors = colors;
    Ok(())
}

fn read_coord_index<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let count = read_count(inp)?;
    let mut indices = Vec::with_capacity(count as usize);
    for _ in 0..count {
        indices.push(inp.read_i32()?);
    }
    scene.coord_index_mut(node).indices = indices;
    Ok(())
}

fn read_appearance<R: Read>(scene: &mut Scene, node: NodeId, inp: &mut IStream<R>) -> Result<()> {
    let ambient = inp.read_f32()?;
    let diffuse = glam::Vec3::new(inp.read_f32()?, inp.read_f32()?, inp.read_f32()?);
    let emissive = glam::Vec3::new(inp.read_f32()?, inp.read_f32()?, inp.read_f32()?);
    let specular = glam::Vec3::new(inp.read_f32()?, inp.read_f32()?, inp.read_f32()?);
    let shininess = inp.read_f32()?;
    let transparency = inp.read_f32()?;

    let d = scene.appearance_mut(node);
    d.ambient = ambient;
    d.diffuse = diffuse;
    d.emissive = emissive;
    d.specular = specular;
    d.shininess = shininess;
    d.transparency = transparency;
    Ok(())
}
