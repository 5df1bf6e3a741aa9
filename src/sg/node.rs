//! Node identity, kind tags and per-pass naming.
//!
//! Nodes live in the [`Scene`](super::Scene) arena and are addressed by
//! [`NodeId`], an index plus a generation counter so a handle to a
//! destroyed node is detected instead of dangling.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use super::data::{AppearanceData, ColorsData, CoordIndexData, CoordsData, NormalsData};
use super::faceset::FaceSetData;
use super::shape::ShapeData;
use super::transform::TransformData;

/// Handle to a node in a [`Scene`](super::Scene).
///
/// Stale handles (the node was destroyed, or the slot was recycled) are
/// rejected by the arena; passing one to an accessor that requires a live
/// node is a programming error and panics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// The closed set of node kinds making up a scene graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeKind {
    /// Grouping node with a VRML-style local transform
    Transform,
    /// Pairing of an appearance and a face set
    Shape,
    /// Indexed triangle set aggregating the leaf data nodes
    FaceSet,
    /// Vertex coordinate list
    Coords,
    /// Per-vertex normal list
    Normals,
    /// Per-vertex color list
    Colors,
    /// Triangle vertex index list
    CoordIndex,
    /// Surface material
    Appearance,
}

impl NodeKind {
    /// Number of node kinds; sizes the per-kind name counters.
    pub const COUNT: usize = 8;

    pub(crate) fn index(self) -> usize {
        match self {
            NodeKind::Transform => 0,
            NodeKind::Shape => 1,
            NodeKind::FaceSet => 2,
            NodeKind::Coords => 3,
            NodeKind::Normals => 4,
            NodeKind::Colors => 5,
            NodeKind::CoordIndex => 6,
            NodeKind::Appearance => 7,
        }
    }

    /// Short ASCII prefix used in serialized name tags, e.g. `TXFM_1`.
    pub fn tag_prefix(self) -> &'static str {
        match self {
            NodeKind::Transform => "TXFM",
            NodeKind::Shape => "SHAPE",
            NodeKind::FaceSet => "FACE",
            NodeKind::Coords => "COORD",
            NodeKind::Normals => "NORM",
            NodeKind::Colors => "COL",
            NodeKind::CoordIndex => "COORDIDX",
            NodeKind::Appearance => "APP",
        }
    }

    /// Recover the node kind from a serialized name's prefix.
    pub fn from_tag_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "TXFM" => Some(NodeKind::Transform),
            "SHAPE" => Some(NodeKind::Shape),
            "FACE" => Some(NodeKind::FaceSet),
            "COORD" => Some(NodeKind::Coords),
            "NORM" => Some(NodeKind::Normals),
            "COL" => Some(NodeKind::Colors),
            "COORDIDX" => Some(NodeKind::CoordIndex),
            "APP" => Some(NodeKind::Appearance),
            _ => None,
        }
    }

    /// Human-readable kind name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Transform => "Transform",
            NodeKind::Shape => "Shape",
            NodeKind::FaceSet => "FaceSet",
            NodeKind::Coords => "Coords",
            NodeKind::Normals => "Normals",
            NodeKind::Colors => "Colors",
            NodeKind::CoordIndex => "CoordIndex",
            NodeKind::Appearance => "Appearance",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-kind payload of a node.
pub(crate) enum Payload {
    Transform(TransformData),
    Shape(ShapeData),
    FaceSet(FaceSetData),
    Coords(CoordsData),
    Normals(NormalsData),
    Colors(ColorsData),
    CoordIndex(CoordIndexData),
    Appearance(AppearanceData),
}

impl Payload {
    pub(crate) fn new(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Transform => Payload::Transform(TransformData::new()),
            NodeKind::Shape => Payload::Shape(ShapeData::default()),
            NodeKind::FaceSet => Payload::FaceSet(FaceSetData::default()),
            NodeKind::Coords => Payload::Coords(CoordsData::default()),
            NodeKind::Normals => Payload::Normals(NormalsData::default()),
            NodeKind::Colors => Payload::Colors(ColorsData::default()),
            NodeKind::CoordIndex => Payload::CoordIndex(CoordIndexData::default()),
            NodeKind::Appearance => Payload::Appearance(AppearanceData::default()),
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Payload::Transform(_) => NodeKind::Transform,
            Payload::Shape(_) => NodeKind::Shape,
            Payload::FaceSet(_) => NodeKind::FaceSet,
            Payload::Coords(_) => NodeKind::Coords,
            Payload::Normals(_) => NodeKind::Normals,
            Payload::Colors(_) => NodeKind::Colors,
            Payload::CoordIndex(_) => NodeKind::CoordIndex,
            Payload::Appearance(_) => NodeKind::Appearance,
        }
    }
}

pub(crate) type WrapperCell = Rc<Cell<Option<NodeId>>>;

/// A node record in the arena.
pub(crate) struct Node {
    pub(crate) payload: Payload,
    /// Serialization name; empty until a rename pass assigns one.
    pub(crate) name: String,
    /// Owning parent, if any. Only a root Transform has none.
    pub(crate) parent: Option<NodeId>,
    /// Nodes holding a non-owning reference to this node.
    pub(crate) back_refs: SmallVec<[NodeId; 2]>,
    /// Set once the node has been emitted in the current export pass.
    pub(crate) written: bool,
    /// External wrapper handle, nulled on destruction.
    pub(crate) wrapper: Option<WrapperCell>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Node {
            payload: Payload::new(kind),
            name: String::new(),
            parent: None,
            back_refs: SmallVec::new(),
            written: false,
            wrapper: None,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.payload.kind()
    }
}

/// External weak handle to a node.
///
/// Holds a shared cell that the scene nulls when the node is destroyed, so
/// the external side can always tell whether the node is still alive.
/// Obtained from [`Scene::associate_wrapper`](super::Scene::associate_wrapper).
#[derive(Clone)]
pub struct Wrapper {
    pub(crate) cell: WrapperCell,
}

impl Wrapper {
    /// The wrapped node, or `None` once the node has been destroyed.
    pub fn node(&self) -> Option<NodeId> {
        self.cell.get()
    }

    /// True while the wrapped node is alive.
    pub fn is_live(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Per-pass node name generator.
///
/// Every cache write and every VRML export renames the tree with a fresh
/// `Namer`, so counters restart at 1 for each pass and two independent
/// writes in one process cannot interfere.
#[derive(Default)]
pub struct Namer {
    counts: [u32; NodeKind::COUNT],
}

impl Namer {
    /// Create a generator with all per-kind counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next unique name for the given kind, e.g. `TXFM_1`.
    pub fn next(&mut self, kind: NodeKind) -> String {
        let n = &mut self.counts[kind.index()];
        *n += 1;
        format!("{}_{}", kind.tag_prefix(), *n)
    }
}
