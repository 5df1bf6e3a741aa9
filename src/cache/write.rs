//! Cache serialization: graph linearization and the binary writer.
//!
//! A scene graph may reference nodes owned by subtrees that come later in
//! traversal order, but the file format can only name nodes already
//! emitted. [`linearize`] fixes this up front: walking the tree in write
//! order, any reference to a not-yet-visited node takes ownership of it,
//! leaving the old owner with a reference to a node that is now written
//! earlier. After linearization every reference in write order points
//! backwards and the writer itself never mutates the graph structure.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use glam::DVec3;
use log::debug;

use crate::sg::{AxisAngle, Namer, NodeId, NodeKind, Scene};
use crate::util::{Error, Result};

use super::stream::OStream;
use super::{CACHE_MAGIC, CACHE_VERSION};

/// Rearrange ownership so every reference points at a node emitted
/// earlier in write order. Exposed separately so the rewrite can be
/// tested without touching the filesystem.
pub fn linearize(scene: &mut Scene, root: NodeId) {
    let mut done = HashSet::new();
    linearize_node(scene, root, &mut done);
}

fn linearize_node(scene: &mut Scene, node: NodeId, done: &mut HashSet<NodeId>) {
    // take ownership of forward references before descending
    let forward: Vec<NodeId> = scene
        .ref_targets(node)
        .iter()
        .copied()
        .filter(|t| !done.contains(t))
        .collect();
    for target in forward {
        if !scene.swap_parent(target, node) {
            debug!("could not take ownership of a forward reference");
        }
    }

    for child in scene.owned_children(node) {
        linearize_node(scene, child, done);
    }
    done.insert(node);
}

/// Write the graph containing `node` to a cache file.
///
/// The write starts at the graph root regardless of which node is passed.
/// The tree is linearized and renamed first, so the operation mutates
/// reference topology and node names (but never geometry).
pub fn write_cache(scene: &mut Scene, node: NodeId, path: &Path) -> Result<()> {
    let root = scene.root_of(node);
    if scene.kind(root) != NodeKind::Transform {
        return Err(Error::KindMismatch {
            name: scene.name(root).to_owned(),
            expected: "Transform",
            actual: scene.kind(root).name(),
        });
    }

    linearize(scene, root);
    let mut namer = Namer::new();
    scene.rename_nodes(root, &mut namer);

    let file = File::create(path)?;
    let mut out = OStream::new(BufWriter::new(file));
    out.write_bytes(CACHE_MAGIC)?;
    out.write_u32(CACHE_VERSION)?;
    write_node(scene, root, &mut out)?;
    out.flush()
}

pub(crate) fn write_node<W: Write>(
    scene: &mut Scene,
    node: NodeId,
    out: &mut OStream<W>,
) -> Result<()> {
    out.write_tag(scene.name(node))?;
    match scene.kind(node) {
        NodeKind::Transform => write_transform(scene, node, out)?,
        NodeKind::Shape => write_shape(scene, node, out)?,
        NodeKind::FaceSet => write_faceset(scene, node, out)?,
        NodeKind::Coords => write_coords(scene, node, out)?,
        NodeKind::Normals => write_normals(scene, node, out)?,
        NodeKind::Colors => write_colors(scene, node, out)?,
        NodeKind::CoordIndex => write_coord_index(scene, node, out)?,
        NodeKind::Appearance => write_appearance(scene, node, out)?,
    }
    scene.mark_written(node);
    Ok(())
}

/// A reference is written as the target's name; the target must already
/// be on disk.
fn write_ref<W: Write>(scene: &Scene, target: NodeId, out: &mut OStream<W>) -> Result<()> {
    if !scene.is_written(target) {
        return Err(Error::WriteFailed(format!(
            "reference to '{}' precedes its definition",
            scene.name(target)
        )));
    }
    out.write_string(scene.name(target))
}

fn write_vec3<W: Write>(out: &mut OStream<W>, v: DVec3) -> Result<()> {
    out.write_f64(v.x)?;
    out.write_f64(v.y)?;
    out.write_f64(v.z)
}

fn write_rotation<W: Write>(out: &mut OStream<W>, r: AxisAngle) -> Result<()> {
    write_vec3(out, r.axis)?;
    out.write_f64(r.angle)
}

fn write_transform<W: Write>(scene: &mut Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let d = scene.transform(node);
    let ct = d.child_transforms().to_vec();
    let rt = d.ref_transforms().to_vec();
    let cs = d.child_shapes().to_vec();
    let rs = d.ref_shapes().to_vec();
    let (center, translation, rotation) = (d.center, d.translation, d.rotation);
    let (scale, scale_orientation) = (d.scale, d.scale_orientation);

    out.write_u32(ct.len() as u32)?;
    out.write_u32(rt.len() as u32)?;
    out.write_u32(cs.len() as u32)?;
    out.write_u32(rs.len() as u32)?;

    write_vec3(out, center)?;
    write_vec3(out, translation)?;
    write_rotation(out, rotation)?;
    write_vec3(out, scale)?;
    write_rotation(out, scale_orientation)?;

    for child in ct {
        write_node(scene, child, out)?;
    }
    for target in rt {
        write_ref(scene, target, out)?;
    }
    for child in cs {
        write_node(scene, child, out)?;
    }
    for target in rs {
        write_ref(scene, target, out)?;
    }
    Ok(())
}

fn write_shape<W: Write>(scene: &mut Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let d = scene.shape(node);
    let (a, ra) = (d.owned_appearance(), d.ref_appearance());
    let (f, rf) = (d.owned_faceset(), d.ref_faceset());

    out.write_u8(a.is_some() as u8)?;
    out.write_u8(ra.is_some() as u8)?;
    out.write_u8(f.is_some() as u8)?;
    out.write_u8(rf.is_some() as u8)?;

    if let Some(id) = a {
        write_node(scene, id, out)?;
    }
    if let Some(id) = ra {
        write_ref(scene, id, out)?;
    }
    if let Some(id) = f {
        write_node(scene, id, out)?;
    }
    if let Some(id) = rf {
        write_ref(scene, id, out)?;
    }
    Ok(())
}

fn write_faceset<W: Write>(scene: &mut Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let d = scene.faceset(node);
    let (c, rc) = (d.owned_coords(), d.ref_coords());
    let ci = d.coord_index();
    let (n, rn) = (d.owned_normals(), d.ref_normals());
    let (col, rcol) = (d.owned_colors(), d.ref_colors());

    out.write_u8(c.is_some() as u8)?;
    out.write_u8(rc.is_some() as u8)?;
    out.write_u8(ci.is_some() as u8)?;
    out.write_u8(n.is_some() as u8)?;
    out.write_u8(rn.is_some() as u8)?;
    out.write_u8(col.is_some() as u8)?;
    out.write_u8(rcol.is_some() as u8)?;

    if let Some(id) = c {
        write_node(scene, id, out)?;
    }
    if let Some(id) = rc {
        write_ref(scene, id, out)?;
    }
    if let Some(id) = ci {
        write_node(scene, id, out)?;
    }
    if let Some(id) = n {
        write_node(scene, id, out)?;
    }
    if let Some(id) = rn {
        write_ref(scene, id, out)?;
    }
    if let Some(id) = col {
        write_node(scene, id, out)?;
    }
    if let Some(id) = rcol {
        write_ref(scene, id, out)?;
    }
    Ok(())
}

fn write_coords<W: Write>(scene: &Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let points = &scene.coords(node).points;
    out.write_u32(points.len() as u32)?;
    for p in points {
        write_vec3(out, *p)?;
    }
    Ok(())
}

fn write_normals<W: Write>(scene: &Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let vectors = &scene.normals(node).vectors;
    out.write_u32(vectors.len() as u32)?;
    for v in vectors {
        write_vec3(out, *v)?;
    }
    Ok(())
}

fn write_colors<W: Write>(scene: &Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let colors = &scene.colors(node).colors;
    out.write_u32(colors.len() as u32)?;
    for c in colors {
        out.write_f32(c.x)?;
        out.write_f32(c.y)?;
        out.write_f32(c.z)?;
    }
    Ok(())
}

fn write_coord_index<W: Write>(scene: &Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let indices = &scene.coord_index(node).indices;
    out.write_u32(indices.len() as u32)?;
    for &i in indices {
        out.write_i32(i)?;
    }
    Ok(())
}

fn write_appearance<W: Write>(scene: &Scene, node: NodeId, out: &mut OStream<W>) -> Result<()> {
    let d = scene.appearance(node);
    out.write_f32(d.ambient)?;
    out.write_f32(d.diffuse.x)?;
    out.write_f32(d.diffuse.y)?;
    out.write_f32(d.diffuse.z)?;
    out.write_f32(d.emissive.x)?;
    out.write_f32(d.emissive.y)?;
    out.write_f32(d.emissive.z)?;
    out.write_f32(d.specular.x)?;
    out.write_f32(d.specular.y)?;
    out.write_f32(d.specular.z)?;
    out.write_f32(d.shininess)?;
    out.write_f32(d.transparency)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faceset_with_triangle(scene: &mut Scene, shape: NodeId) -> NodeId {
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs)).unwrap();
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(1.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(0.0, 1.0, 0.0);
        let ix = scene.new_node(NodeKind::CoordIndex, Some(fs)).unwrap();
        scene.coord_index_mut(ix).add_triangle(0, 1, 2);
        fs
    }

    #[test]
    fn test_linearize_promotes_forward_reference() {
        // s1 comes first in write order but only references the face set
        // owned by s2; linearization must hand ownership to s1
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = faceset_with_triangle(&mut scene, s2);
        assert!(scene.add_ref_node(s1, fs));

        linearize(&mut scene, root);
        assert_eq!(scene.parent(fs), Some(s1));
        assert_eq!(scene.shape(s1).owned_faceset(), Some(fs));
        assert_eq!(scene.shape(s2).ref_faceset(), Some(fs));
    }

    #[test]
    fn test_linearize_keeps_backward_reference() {
        // s1 owns the face set and comes first; s2's reference already
        // points backwards and must be left alone
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = faceset_with_triangle(&mut scene, s1);
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        assert!(scene.add_ref_node(s2, fs));

        linearize(&mut scene, root);
        assert_eq!(scene.parent(fs), Some(s1));
        assert_eq!(scene.shape(s2).ref_faceset(), Some(fs));
    }

    #[test]
    fn test_linearize_shared_leaf_between_facesets() {
        // a coordinate list owned by the second face set in write order
        // and referenced by the first
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs1 = scene.new_node(NodeKind::FaceSet, Some(s1)).unwrap();
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs2 = scene.new_node(NodeKind::FaceSet, Some(s2)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs2)).unwrap();
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        assert!(scene.add_ref_node(fs1, co));

        linearize(&mut scene, root);
        assert_eq!(scene.parent(co), Some(fs1));
        assert_eq!(scene.faceset(fs2).ref_coords(), Some(co));
    }

    #[test]
    fn test_write_order_satisfies_references() {
        // after linearize + rename, a full in-memory write must succeed
        // even when the graph started with a forward reference
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = faceset_with_triangle(&mut scene, s2);
        assert!(scene.add_ref_node(s1, fs));

        linearize(&mut scene, root);
        let mut namer = Namer::new();
        scene.rename_nodes(root, &mut namer);

        let mut out = OStream::new(Vec::new());
        write_node(&mut scene, root, &mut out).unwrap();
        let bytes = out.into_inner();
        assert!(!bytes.is_empty());
        // the record starts with the root's tag
        assert!(bytes.starts_with(b"[TXFM_1]"));
    }

    #[test]
    fn test_unlinearized_forward_reference_fails() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = faceset_with_triangle(&mut scene, s2);
        assert!(scene.add_ref_node(s1, fs));

        let mut namer = Namer::new();
        scene.rename_nodes(root, &mut namer);

        let mut out = OStream::new(Vec::new());
        assert!(write_node(&mut scene, root, &mut out).is_err());
    }
}
