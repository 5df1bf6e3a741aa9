//! VRML2.0 text export.
//!
//! Writes a Transform tree as a `#VRML V2.0 utf8` world. With `reuse`
//! enabled, every node is emitted as `DEF <name>` the first time it
//! appears and `USE <name>` afterwards, so shared appearances, face sets
//! and coordinate lists stay shared in the output; with `reuse` disabled
//! shared nodes are duplicated inline.
//!
//! Model units are millimetres; VRML output is rescaled to the 0.1 inch
//! world unit expected by board viewers, so translations, centers and
//! coordinates are divided by 2.54. Rotations and scale factors are
//! dimensionless and pass through unchanged.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::sg::{Namer, NodeId, NodeKind, Scene};
use crate::util::{Error, Result};

/// World unit of the output, in millimetres (0.1 inch).
const VRML_UNIT_MM: f64 = 2.54;

/// Write the Transform tree rooted at `node` as a VRML2.0 file.
///
/// The tree is renamed first, so serialization names are fresh for this
/// export. Fails with [`Error::EmptyGraph`] when there is nothing
/// drawable.
pub fn write_vrml(scene: &mut Scene, node: NodeId, path: &Path, reuse: bool) -> Result<()> {
    if scene.kind(node) != NodeKind::Transform {
        return Err(Error::KindMismatch {
            name: scene.name(node).to_owned(),
            expected: "Transform",
            actual: scene.kind(node).name(),
        });
    }
    if scene.transform(node).is_empty() {
        return Err(Error::EmptyGraph);
    }

    // normals must exist before the rename pass so the nodes created here
    // get serialization names too
    compute_missing_normals(scene, node);

    let mut namer = Namer::new();
    scene.rename_nodes(node, &mut namer);

    let mut body = String::new();
    if !write_transform(scene, node, &mut body, reuse)? {
        return Err(Error::EmptyGraph);
    }

    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    w.write_all(b"#VRML V2.0 utf8\n")?;
    w.write_all(body.as_bytes())?;
    w.flush()?;
    Ok(())
}

fn compute_missing_normals(scene: &mut Scene, node: NodeId) {
    if scene.kind(node) == NodeKind::FaceSet
        && scene.faceset(node).effective_normals().is_none()
        && !scene.calc_normals(node)
    {
        debug!("cannot compute normals for a face set");
    }
    for child in scene.owned_children(node) {
        compute_missing_normals(scene, child);
    }
}

/// Returns true if the node produced any output. An empty transform (or
/// one whose shapes are all skipped) writes nothing, so a parent can drop
/// the wrapper too.
fn write_transform(scene: &mut Scene, node: NodeId, out: &mut String, reuse: bool) -> Result<bool> {
    if reuse && scene.is_written(node) {
        writeln!(out, "USE {}", scene.name(node))?;
        return Ok(true);
    }

    let d = scene.transform(node);
    let children: Vec<NodeId> = d
        .child_transforms()
        .iter()
        .chain(d.ref_transforms())
        .chain(d.child_shapes())
        .chain(d.ref_shapes())
        .copied()
        .collect();

    let mut inner = String::new();
    let mut wrote = false;
    for child in children {
        wrote |= match scene.kind(child) {
            NodeKind::Transform => write_transform(scene, child, &mut inner, reuse)?,
            NodeKind::Shape => write_shape(scene, child, &mut inner, reuse)?,
            _ => false,
        };
    }
    if !wrote {
        return Ok(false);
    }

    let d = scene.transform(node);
    let t = d.translation / VRML_UNIT_MM;
    let c = d.center / VRML_UNIT_MM;
    let r = d.rotation;
    let s = d.scale;
    let so = d.scale_orientation;

    if reuse {
        writeln!(out, "DEF {} Transform {{", scene.name(node))?;
        scene.mark_written(node);
    } else {
        out.push_str("Transform {\n");
    }
    writeln!(out, "  translation {} {} {}", t.x, t.y, t.z)?;
    writeln!(out, "  rotation {} {} {} {}", r.axis.x, r.axis.y, r.axis.z, r.angle)?;
    writeln!(out, "  scale {} {} {}", s.x, s.y, s.z)?;
    writeln!(
        out,
        "  scaleOrientation {} {} {} {}",
        so.axis.x, so.axis.y, so.axis.z, so.angle
    )?;
    writeln!(out, "  center {} {} {}", c.x, c.y, c.z)?;
    out.push_str("  children [\n");
    out.push_str(&inner);
    out.push_str("  ]\n}\n");
    Ok(true)
}

fn write_shape(scene: &mut Scene, node: NodeId, out: &mut String, reuse: bool) -> Result<bool> {
    let Some(fs) = scene.shape(node).effective_faceset() else {
        return Ok(false);
    };

    if !scene.validate_faceset(fs) {
        debug!("badly formed face set, skipping shape");
        return Ok(false);
    }

    if reuse && scene.is_written(node) {
        writeln!(out, "USE {}", scene.name(node))?;
        return Ok(true);
    }

    if reuse {
        writeln!(out, "DEF {} Shape {{", scene.name(node))?;
        scene.mark_written(node);
    } else {
        out.push_str("Shape {\n");
    }

    if let Some(app) = scene.shape(node).effective_appearance() {
        write_appearance(scene, app, out, reuse)?;
    }
    write_faceset(scene, fs, out, reuse)?;
    out.push_str("}\n");
    Ok(true)
}

fn write_appearance(scene: &mut Scene, node: NodeId, out: &mut String, reuse: bool) -> Result<()> {
    if reuse && scene.is_written(node) {
        writeln!(out, "  appearance USE {}", scene.name(node))?;
        return Ok(());
    }

    if reuse {
        writeln!(out, "  appearance DEF {} Appearance {{", scene.name(node))?;
        scene.mark_written(node);
    } else {
        out.push_str("  appearance Appearance {\n");
    }

    let d = scene.appearance(node).clone();
    out.push_str("    material Material {\n");
    writeln!(out, "      diffuseColor {} {} {}", d.diffuse.x, d.diffuse.y, d.diffuse.z)?;
    writeln!(
        out,
        "      specularColor {} {} {}",
        d.specular.x, d.specular.y, d.specular.z
    )?;
    writeln!(
        out,
        "      emissiveColor {} {} {}",
        d.emissive.x, d.emissive.y, d.emissive.z
    )?;
    writeln!(out, "      ambientIntensity {}", d.ambient)?;
    writeln!(out, "      transparency {}", d.transparency)?;
    writeln!(out, "      shininess {}", d.shininess)?;
    out.push_str("    }\n  }\n");
    Ok(())
}

fn write_faceset(scene: &mut Scene, node: NodeId, out: &mut String, reuse: bool) -> Result<()> {
    if reuse && scene.is_written(node) {
        writeln!(out, "  geometry USE {}", scene.name(node))?;
        return Ok(());
    }

    if reuse {
        writeln!(out, "  geometry DEF {} IndexedFaceSet {{", scene.name(node))?;
        scene.mark_written(node);
    } else {
        out.push_str("  geometry IndexedFaceSet {\n");
    }

    let d = scene.faceset(node);
    let (Some(cid), Some(nid), Some(iid)) =
        (d.effective_coords(), d.effective_normals(), d.coord_index())
    else {
        // validated before the call; nothing sensible to emit
        out.push_str("  }\n");
        return Ok(());
    };
    let col = d.effective_colors();

    write_coordinate(scene, cid, out, reuse)?;

    out.push_str("    coordIndex [\n");
    for tri in scene.coord_index(iid).indices.chunks_exact(3) {
        writeln!(out, "      {}, {}, {}, -1,", tri[0], tri[1], tri[2])?;
    }
    out.push_str("    ]\n");

    write_normal(scene, nid, out, reuse)?;
    out.push_str("    normalPerVertex TRUE\n");

    if let Some(col) = col {
        write_color(scene, col, out, reuse)?;
        out.push_str("    colorPerVertex TRUE\n");
    }

    out.push_str("  }\n");
    Ok(())
}

fn write_coordinate(scene: &mut Scene, node: NodeId, out: &mut String, reuse: bool) -> Result<()> {
    if reuse && scene.is_written(node) {
        writeln!(out, "    coord USE {}", scene.name(node))?;
        return Ok(());
    }

    if reuse {
        writeln!(out, "    coord DEF {} Coordinate {{", scene.name(node))?;
        scene.mark_written(node);
    } else {
        out.push_str("    coord Coordinate {\n");
    }

    out.push_str("      point [\n");
    for p in &scene.coords(node).points {
        let p = *p / VRML_UNIT_MM;
        writeln!(out, "        {} {} {},", p.x, p.y, p.z)?;
    }
    out.push_str("      ]\n    }\n");
    Ok(())
}

fn write_normal(scene: &mut Scene, node: NodeId, out: &mut String, reuse: bool) -> Result<()> {
    if reuse && scene.is_written(node) {
        writeln!(out, "    normal USE {}", scene.name(node))?;
        return Ok(());
    }

    if reuse {
        writeln!(out, "    normal DEF {} Normal {{", scene.name(node))?;
        scene.mark_written(node);
    } else {
        out.push_str("    normal Normal {\n");
    }

    out.push_str("      vector [\n");
    for v in &scene.normals(node).vectors {
        writeln!(out, "        {} {} {},", v.x, v.y, v.z)?;
    }
    out.push_str("      ]\n    }\n");
    Ok(())
}

fn write_color(scene: &mut Scene, node: NodeId, out: &mut String, reuse: bool) -> Result<()> {
    if reuse && scene.is_written(node) {
        writeln!(out, "    color USE {}", scene.name(node))?;
        return Ok(());
    }

    if reuse {
        writeln!(out, "    color DEF {} Color {{", scene.name(node))?;
        scene.mark_written(node);
    } else {
        out.push_str("    color Color {\n");
    }

    out.push_str("      color [\n");
    for c in &scene.colors(node).colors {
        writeln!(out, "        {} {} {},", c.x, c.y, c.z)?;
    }
    out.push_str("      ]\n    }\n");
    Ok(())
}
