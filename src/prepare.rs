//! Flatten a scene graph into renderer-ready triangle meshes.
//!
//! [`prepare`] walks a Transform subtree in traversal order (shapes before
//! child transforms), accumulates the local transforms, and produces one
//! [`TriangleMesh`] per drawable shape with single-precision vertex data
//! and a shared material table. Badly formed face sets are skipped, not
//! fatal: a model with one broken shape still renders the rest.

use std::collections::HashMap;

use glam::{DMat4, DVec3, Vec3};
use log::debug;

use crate::sg::{AppearanceData, NodeId, NodeKind, Scene};
use crate::util::{Error, Result};

/// One flattened drawable: world-space vertex data plus an index into the
/// model's material table.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    /// Index into [`Model::materials`].
    pub material: usize,
    /// World-space vertex positions.
    pub positions: Vec<Vec3>,
    /// World-space unit normals, one per position.
    pub normals: Vec<Vec3>,
    /// Per-vertex colors, when the face set carries them.
    pub colors: Option<Vec<Vec3>>,
    /// Triangle indices into the vertex arrays.
    pub indices: Vec<u32>,
}

/// A flattened model: the material table plus one mesh per drawable shape.
///
/// `materials[0]` is always the default material, used by shapes without
/// an appearance; distinct appearance nodes follow in first-use order, so
/// shapes sharing one appearance node share one material entry.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub materials: Vec<AppearanceData>,
    pub meshes: Vec<TriangleMesh>,
}

struct MaterialTable {
    order: Vec<AppearanceData>,
    by_node: HashMap<NodeId, usize>,
}

impl MaterialTable {
    fn new() -> Self {
        MaterialTable {
            order: vec![AppearanceData::default()],
            by_node: HashMap::new(),
        }
    }

    fn index(&mut self, scene: &Scene, appearance: Option<NodeId>) -> usize {
        match appearance {
            None => 0,
            Some(id) => {
                if let Some(&i) = self.by_node.get(&id) {
                    i
                } else {
                    let i = self.order.len();
                    self.order.push(scene.appearance(id).clone());
                    self.by_node.insert(id, i);
                    i
                }
            }
        }
    }
}

/// Flatten the Transform subtree rooted at `node`.
///
/// The scene is mutable because missing normals are computed on the way
/// and validation results are memoized.
pub fn prepare(scene: &mut Scene, node: NodeId) -> Result<Model> {
    if scene.kind(node) != NodeKind::Transform {
        return Err(Error::KindMismatch {
            name: scene.name(node).to_owned(),
            expected: "Transform",
            actual: scene.kind(node).name(),
        });
    }

    let mut materials = MaterialTable::new();
    let mut meshes = Vec::new();
    prepare_transform(scene, node, DMat4::IDENTITY, &mut materials, &mut meshes)?;

    Ok(Model {
        materials: materials.order,
        meshes,
    })
}

fn prepare_transform(
    scene: &mut Scene,
    node: NodeId,
    accum: DMat4,
    materials: &mut MaterialTable,
    meshes: &mut Vec<TriangleMesh>,
) -> Result<()> {
    let xf = accum * scene.transform(node).local_matrix();

    // shapes first, then child transforms; owned before referenced
    let data = scene.transform(node);
    let shapes: Vec<NodeId> = data
        .child_shapes()
        .iter()
        .chain(data.ref_shapes())
        .copied()
        .collect();
    let children: Vec<NodeId> = data
        .child_transforms()
        .iter()
        .chain(data.ref_transforms())
        .copied()
        .collect();

    for shape in shapes {
        prepare_shape(scene, shape, &xf, materials, meshes)?;
    }
    for child in children {
        prepare_transform(scene, child, xf, materials, meshes)?;
    }

    Ok(())
}

fn prepare_shape(
    scene: &mut Scene,
    shape: NodeId,
    xf: &DMat4,
    materials: &mut MaterialTable,
    meshes: &mut Vec<TriangleMesh>,
) -> Result<()> {
    let Some(fs) = scene.shape(shape).effective_faceset() else {
        debug!("shape without a face set, skipping");
        return Ok(());
    };

    if scene.faceset(fs).effective_normals().is_none() && !scene.calc_normals(fs) {
        debug!("cannot compute normals, skipping shape");
        return Ok(());
    }

    if !scene.validate_faceset(fs) {
        debug!("badly formed face set, skipping shape");
        return Ok(());
    }

    let material = materials.index(scene, scene.shape(shape).effective_appearance());

    let fsd = scene.faceset(fs);
    let (Some(cid), Some(nid), Some(iid)) = (
        fsd.effective_coords(),
        fsd.effective_normals(),
        fsd.coord_index(),
    ) else {
        // validation guarantees all three
        return Ok(());
    };
    let col_src = fsd.effective_colors().map(|c| &scene.colors(c).colors);

    let points = &scene.coords(cid).points;
    let norms = &scene.normals(nid).vectors;
    let indices = &scene.coord_index(iid).indices;

    // keep only the vertices actually referenced, in first-use order
    let mut remap: HashMap<i32, u32> = HashMap::new();
    let mut mesh = TriangleMesh {
        material,
        colors: col_src.map(|_| Vec::new()),
        ..Default::default()
    };

    for &i in indices {
        let new = match remap.get(&i) {
            Some(&n) => n,
            None => {
                let n = mesh.positions.len() as u32;
                let p = (*xf * points[i as usize].extend(1.0)).truncate();
                mesh.positions.push(p.as_vec3());
                let v = (*xf * norms[i as usize].extend(0.0))
                    .truncate()
                    .normalize_or(DVec3::Z);
                mesh.normals.push(v.as_vec3());
                if let (Some(dst), Some(src)) = (&mut mesh.colors, col_src) {
                    dst.push(src[i as usize]);
                }
                remap.insert(i, n);
                n
            }
        };
        mesh.indices.push(new);
    }

    if mesh.positions.len() < 3 {
        debug!("fewer than 3 distinct vertices, dropping shape");
        return Ok(());
    }

    meshes.push(mesh);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sg::NodeKind;

    fn shape_with_triangle(scene: &mut Scene, parent: NodeId) -> NodeId {
        let shape = scene.new_node(NodeKind::Shape, Some(parent)).unwrap();
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs)).unwrap();
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(1.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(0.0, 1.0, 0.0);
        let ix = scene.new_node(NodeKind::CoordIndex, Some(fs)).unwrap();
        scene.coord_index_mut(ix).add_triangle(0, 1, 2);
        shape
    }

    #[test]
    fn test_translation_applies_to_vertices() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        scene.transform_mut(root).translation = DVec3::new(10.0, 0.0, 0.0);
        shape_with_triangle(&mut scene, root);

        let model = prepare(&mut scene, root).unwrap();
        assert_eq!(model.meshes.len(), 1);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.positions[0], Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(mesh.positions[1], Vec3::new(11.0, 0.0, 0.0));
        // normals are direction vectors, unaffected by translation
        assert!((mesh.normals[0] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_scale_about_center_composition() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        scene.transform_mut(root).center = DVec3::new(1.0, 0.0, 0.0);
        scene.transform_mut(root).scale = DVec3::new(2.0, 1.0, 1.0);
        shape_with_triangle(&mut scene, root);

        let model = prepare(&mut scene, root).unwrap();
        // the origin sits one unit left of the center and scales to two
        assert_eq!(model.meshes[0].positions[0], Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_nested_transforms_accumulate() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        scene.transform_mut(root).translation = DVec3::new(1.0, 0.0, 0.0);
        let child = scene.new_node(NodeKind::Transform, Some(root)).unwrap();
        scene.transform_mut(child).translation = DVec3::new(0.0, 2.0, 0.0);
        shape_with_triangle(&mut scene, child);

        let model = prepare(&mut scene, root).unwrap();
        assert_eq!(model.meshes[0].positions[0], Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_material_table_first_use_order() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();

        // s1 has its own appearance, s2 has none, s3 references s1's
        let s1 = shape_with_triangle(&mut scene, root);
        let app = scene.new_node(NodeKind::Appearance, Some(s1)).unwrap();
        scene.appearance_mut(app).diffuse = Vec3::new(1.0, 0.0, 0.0);
        let _s2 = shape_with_triangle(&mut scene, root);
        let s3 = shape_with_triangle(&mut scene, root);
        assert!(scene.add_ref_node(s3, app));

        let model = prepare(&mut scene, root).unwrap();
        assert_eq!(model.meshes.len(), 3);
        // default material at 0, the red appearance at 1
        assert_eq!(model.materials.len(), 2);
        assert_eq!(model.materials[1].diffuse, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(model.meshes[0].material, 1);
        assert_eq!(model.meshes[1].material, 0);
        assert_eq!(model.meshes[2].material, 1);
    }

    #[test]
    fn test_vertex_reduction_first_use_order() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs)).unwrap();
        // five points, of which index 0 and 4 are never referenced
        for i in 0..5 {
            scene.coords_mut(co).add_point(i as f64, 0.0, 0.0);
        }
        scene.coords_mut(co).points[2].y = 1.0;
        let ix = scene.new_node(NodeKind::CoordIndex, Some(fs)).unwrap();
        scene.coord_index_mut(ix).add_triangle(3, 1, 2);

        let model = prepare(&mut scene, root).unwrap();
        let mesh = &model.meshes[0];
        assert_eq!(mesh.positions.len(), 3);
        // first-use order: 3, 1, 2
        assert_eq!(mesh.positions[0].x, 3.0);
        assert_eq!(mesh.positions[1].x, 1.0);
        assert_eq!(mesh.positions[2], Vec3::new(2.0, 1.0, 0.0));
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_bad_faceset_skipped_not_fatal() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();

        // a shape with an index out of range
        let bad = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = scene.new_node(NodeKind::FaceSet, Some(bad)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs)).unwrap();
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(1.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(0.0, 1.0, 0.0);
        let ix = scene.new_node(NodeKind::CoordIndex, Some(fs)).unwrap();
        scene.coord_index_mut(ix).add_triangle(0, 1, 7);

        // and a good one
        shape_with_triangle(&mut scene, root);

        let model = prepare(&mut scene, root).unwrap();
        assert_eq!(model.meshes.len(), 1);
    }

    #[test]
    fn test_non_transform_root_rejected() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        assert!(prepare(&mut scene, shape).is_err());
    }
}
