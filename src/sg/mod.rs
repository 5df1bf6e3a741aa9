//! The in-memory scene graph.
//!
//! A [`Scene`] is an arena holding every node of one or more model graphs.
//! Nodes are addressed by [`NodeId`] (index + generation, so handles to
//! destroyed nodes are detected rather than left dangling). Two edge kinds
//! connect nodes:
//!
//! - **ownership**: a node has at most one owning parent; destroying the
//!   parent destroys all owned children depth-first;
//! - **reference**: a slot may point at a node owned elsewhere; the target
//!   keeps a back-reference to every referrer so destruction clears all
//!   referring slots.
//!
//! Legal parent/child pairings: Transform under Transform, Shape under
//! Transform, Appearance/FaceSet under Shape, and the leaf data nodes under
//! FaceSet. All structural operations reject illegal pairings with a
//! boolean `false` and no mutation.

pub mod data;
pub mod faceset;
pub mod node;
pub mod shape;
pub mod transform;

pub use data::{AppearanceData, ColorsData, CoordIndexData, CoordsData, NormalsData};
pub use faceset::FaceSetData;
pub use node::{Namer, NodeId, NodeKind, Wrapper};
pub use shape::ShapeData;
pub use transform::{AxisAngle, TransformData};

use std::cell::Cell;
use std::rc::Rc;

use glam::DVec3;
use log::debug;
use smallvec::SmallVec;

use crate::util::{Error, Result};
use node::{Node, Payload, WrapperCell};

/// True if `child` may be owned by (or referenced from) `parent`.
fn legal_child(parent: NodeKind, child: NodeKind) -> bool {
    matches!(
        (parent, child),
        (NodeKind::Transform, NodeKind::Transform | NodeKind::Shape)
            | (NodeKind::Shape, NodeKind::Appearance | NodeKind::FaceSet)
            | (
                NodeKind::FaceSet,
                NodeKind::Coords | NodeKind::Normals | NodeKind::Colors | NodeKind::CoordIndex
            )
    )
}

enum SlotState {
    /// The slot already holds this very node.
    Present,
    /// The slot holds a different node.
    Occupied,
    Free,
}

fn opt_state(owned: Option<NodeId>, referenced: Option<NodeId>, child: NodeId) -> SlotState {
    if owned == Some(child) || referenced == Some(child) {
        SlotState::Present
    } else if owned.is_some() || referenced.is_some() {
        SlotState::Occupied
    } else {
        SlotState::Free
    }
}

fn list_state(owned: &[NodeId], referenced: &[NodeId], child: NodeId) -> SlotState {
    if owned.contains(&child) || referenced.contains(&child) {
        SlotState::Present
    } else {
        SlotState::Free
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena holding the nodes of a scene graph.
#[derive(Default)]
pub struct Scene {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Scene {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// True if `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index as usize)
            .map_or(false, |s| s.generation == id.generation && s.node.is_some())
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    fn node(&self, id: NodeId) -> &Node {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
            .unwrap_or_else(|| panic!("stale node handle {:?}", id))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
            .unwrap_or_else(|| panic!("stale node handle {:?}", id))
    }

    fn insert(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    fn remove_slot(&mut self, id: NodeId) {
        let slot = &mut self.slots[id.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    // ------------------------------------------------------------------
    // Basic accessors
    // ------------------------------------------------------------------

    /// The node's kind.
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind()
    }

    /// The node's serialization name; empty until a rename pass.
    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    /// Set the node's serialization name.
    pub fn set_name(&mut self, id: NodeId, name: &str) {
        self.node_mut(id).name = name.to_owned();
    }

    /// The owning parent, if any.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Nodes currently holding a non-owning reference to this node.
    pub fn back_refs(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).back_refs
    }

    /// Climb the ownership chain to the graph root.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut n = id;
        while let Some(p) = self.node(n).parent {
            n = p;
        }
        n
    }

    pub(crate) fn is_written(&self, id: NodeId) -> bool {
        self.node(id).written
    }

    pub(crate) fn mark_written(&mut self, id: NodeId) {
        self.node_mut(id).written = true;
    }

    // ------------------------------------------------------------------
    // Typed payload accessors
    //
    // Passing an id of the wrong kind is a programming error and panics.
    // ------------------------------------------------------------------

    /// Transform payload.
    pub fn transform(&self, id: NodeId) -> &TransformData {
        match &self.node(id).payload {
            Payload::Transform(d) => d,
            _ => panic!("node {:?} is not a Transform", id),
        }
    }

    /// Mutable transform payload.
    pub fn transform_mut(&mut self, id: NodeId) -> &mut TransformData {
        match &mut self.node_mut(id).payload {
            Payload::Transform(d) => d,
            _ => panic!("node {:?} is not a Transform", id),
        }
    }

    /// Shape payload.
    pub fn shape(&self, id: NodeId) -> &ShapeData {
        match &self.node(id).payload {
            Payload::Shape(d) => d,
            _ => panic!("node {:?} is not a Shape", id),
        }
    }

    /// FaceSet payload.
    pub fn faceset(&self, id: NodeId) -> &FaceSetData {
        match &self.node(id).payload {
            Payload::FaceSet(d) => d,
            _ => panic!("node {:?} is not a FaceSet", id),
        }
    }

    /// Coordinate list payload.
    pub fn coords(&self, id: NodeId) -> &CoordsData {
        match &self.node(id).payload {
            Payload::Coords(d) => d,
            _ => panic!("node {:?} is not a Coords node", id),
        }
    }

    /// Mutable coordinate list payload.
    pub fn coords_mut(&mut self, id: NodeId) -> &mut CoordsData {
        match &mut self.node_mut(id).payload {
            Payload::Coords(d) => d,
            _ => panic!("node {:?} is not a Coords node", id),
        }
    }

    /// Normal list payload.
    pub fn normals(&self, id: NodeId) -> &NormalsData {
        match &self.node(id).payload {
            Payload::Normals(d) => d,
            _ => panic!("node {:?} is not a Normals node", id),
        }
    }

    /// Mutable normal list payload.
    pub fn normals_mut(&mut self, id: NodeId) -> &mut NormalsData {
        match &mut self.node_mut(id).payload {
            Payload::Normals(d) => d,
            _ => panic!("node {:?} is not a Normals node", id),
        }
    }

    /// Color list payload.
    pub fn colors(&self, id: NodeId) -> &ColorsData {
        match &self.node(id).payload {
            Payload::Colors(d) => d,
            _ => panic!("node {:?} is not a Colors node", id),
        }
    }

    /// Mutable color list payload.
    pub fn colors_mut(&mut self, id: NodeId) -> &mut ColorsData {
        match &mut self.node_mut(id).payload {
            Payload::Colors(d) => d,
            _ => panic!("node {:?} is not a Colors node", id),
        }
    }

    /// Index list payload.
    pub fn coord_index(&self, id: NodeId) -> &CoordIndexData {
        match &self.node(id).payload {
            Payload::CoordIndex(d) => d,
            _ => panic!("node {:?} is not a CoordIndex node", id),
        }
    }

    /// Mutable index list payload.
    pub fn coord_index_mut(&mut self, id: NodeId) -> &mut CoordIndexData {
        match &mut self.node_mut(id).payload {
            Payload::CoordIndex(d) => d,
            _ => panic!("node {:?} is not a CoordIndex node", id),
        }
    }

    /// Appearance payload.
    pub fn appearance(&self, id: NodeId) -> &AppearanceData {
        match &self.node(id).payload {
            Payload::Appearance(d) => d,
            _ => panic!("node {:?} is not an Appearance node", id),
        }
    }

    /// Mutable appearance payload.
    pub fn appearance_mut(&mut self, id: NodeId) -> &mut AppearanceData {
        match &mut self.node_mut(id).payload {
            Payload::Appearance(d) => d,
            _ => panic!("node {:?} is not an Appearance node", id),
        }
    }

    // ------------------------------------------------------------------
    // Construction and structural edits
    // ------------------------------------------------------------------

    /// Create a node of the given kind under `parent`.
    ///
    /// `parent` may be `None` only for a Transform acting as a graph root.
    /// The pairing must be legal and the target slot free.
    pub fn new_node(&mut self, kind: NodeKind, parent: Option<NodeId>) -> Result<NodeId> {
        match parent {
            None => {
                if kind != NodeKind::Transform {
                    return Err(Error::InvalidParent {
                        child: kind.name(),
                        parent: "None",
                    });
                }
            }
            Some(p) => {
                let pk = self.kind(p);
                if !legal_child(pk, kind) {
                    return Err(Error::InvalidParent {
                        child: kind.name(),
                        parent: pk.name(),
                    });
                }
            }
        }

        let id = self.insert(Node::new(kind));

        if let Some(p) = parent {
            if !self.add_child_node(p, id) {
                self.remove_slot(id);
                return Err(Error::other(format!(
                    "{} slot already occupied on parent {}",
                    kind.name(),
                    self.kind(p).name()
                )));
            }
        }

        Ok(id)
    }

    /// Attach `child` as an owned child of `parent`.
    ///
    /// Returns `false` (without mutation) for an illegal pairing or an
    /// occupied slot; re-adding a node to the slot it already occupies is a
    /// success no-op. A child owned by a different parent is unlinked from
    /// it first.
    pub fn add_child_node(&mut self, parent: NodeId, child: NodeId) -> bool {
        self.add_node(parent, child, true)
    }

    /// Attach `child` as a referenced (non-owned) node of `parent`.
    ///
    /// Same slot rules as [`add_child_node`](Self::add_child_node); the
    /// child gains a back-reference to `parent`. Index lists cannot be
    /// referenced (the cache format has no slot for it).
    pub fn add_ref_node(&mut self, parent: NodeId, child: NodeId) -> bool {
        self.add_node(parent, child, false)
    }

    fn add_node(&mut self, parent: NodeId, child: NodeId, owned: bool) -> bool {
        if parent == child {
            debug!("refusing to attach a node to itself");
            return false;
        }

        let pk = self.kind(parent);
        let ck = self.kind(child);

        if !legal_child(pk, ck) {
            debug!("cannot attach a {} under a {}", ck, pk);
            return false;
        }

        if !owned && ck == NodeKind::CoordIndex {
            debug!("index lists cannot be referenced");
            return false;
        }

        match self.slot_state(parent, child) {
            SlotState::Present => {
                if pk == NodeKind::FaceSet {
                    self.invalidate_faceset(parent);
                }
                return true;
            }
            SlotState::Occupied => {
                debug!("{} slot on {} already occupied", ck, pk);
                return false;
            }
            SlotState::Free => {}
        }

        if owned {
            if let Some(old) = self.node(child).parent {
                if old != parent {
                    self.unlink_child(old, child);
                }
            }
            self.owned_insert(parent, child);
            self.node_mut(child).parent = Some(parent);
        } else {
            self.ref_insert(parent, child);
            let back_refs = &mut self.node_mut(child).back_refs;
            if !back_refs.contains(&parent) {
                back_refs.push(parent);
            }
        }

        if pk == NodeKind::FaceSet {
            self.invalidate_faceset(parent);
        }

        true
    }

    /// Re-parent a node.
    ///
    /// `parent = None` detaches (legal for any kind during teardown).
    /// Fails without mutation if the new parent's kind is illegal for this
    /// node. With `notify = false` the old parent's child list is left
    /// untouched; this is only correct while the old parent itself is
    /// being dismantled.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>, notify: bool) -> bool {
        let current = self.node(id).parent;
        if current == parent {
            return true;
        }

        if let Some(p) = parent {
            if !legal_child(self.kind(p), self.kind(id)) {
                return false;
            }
        }

        if let Some(old) = current {
            if notify {
                self.unlink_child(old, id);
            }
            self.node_mut(id).parent = None;
        }

        match parent {
            None => true,
            Some(p) => self.add_node(p, id, true),
        }
    }

    /// Transfer ownership of `id` to `new_parent`, which must currently
    /// reference the node and be of the same kind as the old parent. The
    /// old parent keeps access through a reference. Used by cache
    /// linearization.
    pub fn swap_parent(&mut self, id: NodeId, new_parent: NodeId) -> bool {
        if self.node(id).parent == Some(new_parent) {
            return true;
        }

        let Some(old) = self.node(id).parent else {
            return self.add_child_node(new_parent, id);
        };

        if self.kind(old) != self.kind(new_parent) {
            return false;
        }

        if !self.has_ref(new_parent, id) {
            debug!("swap_parent: new parent does not reference the node");
            return false;
        }

        self.unlink_ref(new_parent, id);
        self.node_mut(id).back_refs.retain(|n| *n != new_parent);

        self.unlink_child(old, id);
        self.node_mut(id).parent = Some(new_parent);
        self.owned_insert(new_parent, id);

        // the old owner keeps access through a reference
        self.ref_insert(old, id);
        self.node_mut(id).back_refs.push(old);

        if self.kind(new_parent) == NodeKind::FaceSet {
            self.invalidate_faceset(new_parent);
            self.invalidate_faceset(old);
        }

        true
    }

    /// Destroy a node: owned children first (depth-first), then notify all
    /// referrers to drop their pointers, unlink from the owning parent and
    /// null the external wrapper handle.
    pub fn destroy(&mut self, id: NodeId) {
        loop {
            let next = self.owned_children(id).first().copied();
            match next {
                Some(child) => self.destroy(child),
                None => break,
            }
        }

        let back_refs: SmallVec<[NodeId; 2]> = std::mem::take(&mut self.node_mut(id).back_refs);
        for referrer in back_refs {
            if self.contains(referrer) {
                self.unlink_ref(referrer, id);
            }
        }

        for target in self.ref_targets(id) {
            if self.contains(target) {
                self.node_mut(target).back_refs.retain(|n| *n != id);
            }
        }

        if let Some(parent) = self.node(id).parent {
            self.unlink_child(parent, id);
        }

        if let Some(wrapper) = self.node_mut(id).wrapper.take() {
            wrapper.set(None);
        }

        self.remove_slot(id);
    }

    // ------------------------------------------------------------------
    // Name lookup
    // ------------------------------------------------------------------

    /// Find a node by name, starting at `start`.
    ///
    /// Checks `start` itself, then its owned subtree, then delegates to the
    /// parent — unless the parent is `caller`, which prevents bouncing back
    /// down the edge the query came from. Calling with `caller =
    /// Some(start)` searches the whole tree from any node.
    pub fn find_node(&self, start: NodeId, name: &str, caller: Option<NodeId>) -> Option<NodeId> {
        if name.is_empty() {
            return None;
        }

        if self.node(start).name == name {
            return Some(start);
        }

        for child in self.owned_children(start) {
            if let Some(found) = self.find_node_down(child, name) {
                return Some(found);
            }
        }

        match self.node(start).parent {
            Some(p) if caller != Some(p) => self.find_node(p, name, Some(start)),
            _ => None,
        }
    }

    fn find_node_down(&self, id: NodeId, name: &str) -> Option<NodeId> {
        if self.node(id).name == name {
            return Some(id);
        }
        for child in self.owned_children(id) {
            if let Some(found) = self.find_node_down(child, name) {
                return Some(found);
            }
        }
        // referenced nodes are owned elsewhere in the tree; a name check
        // here suffices and avoids re-walking shared subtrees
        self.ref_targets(id)
            .iter()
            .copied()
            .find(|&t| self.node(t).name == name)
    }

    // ------------------------------------------------------------------
    // Wrapper association
    // ------------------------------------------------------------------

    /// Associate an external wrapper handle with the node. The handle is
    /// nulled automatically when the node is destroyed.
    ///
    /// # Panics
    /// A node may have at most one association; associating a second
    /// wrapper without releasing the first is a programming error.
    pub fn associate_wrapper(&mut self, id: NodeId) -> Wrapper {
        let node = self.node_mut(id);
        assert!(
            node.wrapper.is_none(),
            "node {:?} already has an associated wrapper",
            id
        );
        let cell: WrapperCell = Rc::new(Cell::new(Some(id)));
        node.wrapper = Some(Rc::clone(&cell));
        Wrapper { cell }
    }

    /// Release a wrapper association. A no-op if the node has none.
    ///
    /// # Panics
    /// The passed wrapper must be the one currently associated.
    pub fn disassociate_wrapper(&mut self, id: NodeId, wrapper: &Wrapper) {
        let node = self.node_mut(id);
        let Some(current) = &node.wrapper else {
            return;
        };
        assert!(
            Rc::ptr_eq(current, &wrapper.cell),
            "wrapper does not match the association on node {:?}",
            id
        );
        node.wrapper = None;
    }

    // ------------------------------------------------------------------
    // Rename pass
    // ------------------------------------------------------------------

    /// Assign fresh serialization names to the owned tree under `root` and
    /// clear the written flags. Every cache write and VRML export runs
    /// this with a fresh [`Namer`].
    pub fn rename_nodes(&mut self, root: NodeId, namer: &mut Namer) {
        let name = namer.next(self.kind(root));
        {
            let node = self.node_mut(root);
            node.name = name;
            node.written = false;
        }
        for child in self.owned_children(root) {
            self.rename_nodes(child, namer);
        }
    }

    // ------------------------------------------------------------------
    // FaceSet validation and normals
    // ------------------------------------------------------------------

    /// Validate a face set. The result is memoized until a slot changes.
    pub fn validate_faceset(&mut self, id: NodeId) -> bool {
        {
            let d = self.faceset(id);
            if d.validated {
                return d.valid;
            }
        }
        let ok = self.check_faceset(id);
        if let Payload::FaceSet(d) = &mut self.node_mut(id).payload {
            d.validated = true;
            d.valid = ok;
        }
        ok
    }

    fn check_faceset(&self, id: NodeId) -> bool {
        let d = self.faceset(id);

        let (Some(cid), Some(nid), Some(iid)) =
            (d.effective_coords(), d.effective_normals(), d.coord_index)
        else {
            debug!("bad model: missing coordinates, normals or indices");
            return false;
        };

        let n_coords = self.coords(cid).points.len();
        if n_coords < 3 {
            debug!("bad model: fewer than 3 vertices");
            return false;
        }

        let indices = &self.coord_index(iid).indices;
        if indices.len() < 3 || indices.len() % 3 != 0 {
            debug!("bad model: no vertex indices or count not a multiple of 3");
            return false;
        }

        if indices.iter().any(|&i| i < 0 || i as usize >= n_coords) {
            debug!("bad model: vertex index out of bounds");
            return false;
        }

        if self.normals(nid).vectors.len() != n_coords {
            debug!(
                "bad model: {} normals for {} vertices",
                self.normals(nid).vectors.len(),
                n_coords
            );
            return false;
        }

        if let Some(col) = d.effective_colors() {
            if self.colors(col).colors.len() < n_coords {
                debug!("bad model: fewer colors than vertices");
                return false;
            }
        }

        true
    }

    /// Append the face set's index list to `out`.
    pub fn gather_coord_indices(&self, faceset: NodeId, out: &mut Vec<i32>) {
        if let Some(ci) = self.faceset(faceset).coord_index {
            out.extend_from_slice(&self.coord_index(ci).indices);
        }
    }

    /// Compute per-vertex normals for the face set's coordinates.
    ///
    /// The triangle set is the union of the coordinate node's owning face
    /// set's indices and those of every face set referencing it, so a
    /// shared coordinate list gets normals consistent across all shapes
    /// that use it. The result is stored in this face set's owned Normal
    /// node (created if absent). A no-op success if usable normals already
    /// exist.
    pub fn calc_normals(&mut self, faceset: NodeId) -> bool {
        let Some(cid) = self.faceset(faceset).effective_coords() else {
            return false;
        };
        if self.coords(cid).points.is_empty() {
            return false;
        }

        if let Some(nid) = self.faceset(faceset).owned_normals() {
            if !self.normals(nid).vectors.is_empty() {
                return true;
            }
        }
        if let Some(nid) = self.faceset(faceset).ref_normals() {
            if !self.normals(nid).vectors.is_empty() {
                return true;
            }
        }

        let mut ilist = Vec::new();
        if let Some(owner) = self.node(cid).parent {
            self.gather_coord_indices(owner, &mut ilist);
        }
        let referrers: SmallVec<[NodeId; 2]> = self.node(cid).back_refs.iter().copied().collect();
        for r in referrers {
            if self.kind(r) == NodeKind::FaceSet {
                self.gather_coord_indices(r, &mut ilist);
            }
        }
        if ilist.is_empty() {
            return false;
        }

        let vectors = vertex_normals(&self.coords(cid).points, &ilist);

        let target = match self.faceset(faceset).owned_normals() {
            Some(nid) => nid,
            None => match self.new_node(NodeKind::Normals, Some(faceset)) {
                Ok(nid) => nid,
                Err(_) => return false,
            },
        };
        self.normals_mut(target).vectors = vectors;
        self.invalidate_faceset(faceset);
        true
    }

    // ------------------------------------------------------------------
    // Slot plumbing
    // ------------------------------------------------------------------

    /// Owned children in serialization order.
    pub(crate) fn owned_children(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
        match &self.node(id).payload {
            Payload::Transform(d) => d
                .transforms
                .iter()
                .copied()
                .chain(d.shapes.iter().copied())
                .collect(),
            Payload::Shape(d) => d.appearance.into_iter().chain(d.faceset).collect(),
            Payload::FaceSet(d) => d
                .coords
                .into_iter()
                .chain(d.coord_index)
                .chain(d.normals)
                .chain(d.colors)
                .collect(),
            _ => SmallVec::new(),
        }
    }

    /// Nodes this node references without owning.
    pub(crate) fn ref_targets(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
        match &self.node(id).payload {
            Payload::Transform(d) => d
                .r_transforms
                .iter()
                .copied()
                .chain(d.r_shapes.iter().copied())
                .collect(),
            Payload::Shape(d) => d.r_appearance.into_iter().chain(d.r_faceset).collect(),
            Payload::FaceSet(d) => d
                .r_coords
                .into_iter()
                .chain(d.r_normals)
                .chain(d.r_colors)
                .collect(),
            _ => SmallVec::new(),
        }
    }

    fn has_ref(&self, parent: NodeId, child: NodeId) -> bool {
        self.ref_targets(parent).contains(&child)
    }

    fn slot_state(&self, parent: NodeId, child: NodeId) -> SlotState {
        let ck = self.kind(child);
        match (&self.node(parent).payload, ck) {
            (Payload::Transform(d), NodeKind::Transform) => {
                list_state(&d.transforms, &d.r_transforms, child)
            }
            (Payload::Transform(d), NodeKind::Shape) => list_state(&d.shapes, &d.r_shapes, child),
            (Payload::Shape(d), NodeKind::Appearance) => {
                opt_state(d.appearance, d.r_appearance, child)
            }
            (Payload::Shape(d), NodeKind::FaceSet) => opt_state(d.faceset, d.r_faceset, child),
            (Payload::FaceSet(d), NodeKind::Coords) => opt_state(d.coords, d.r_coords, child),
            (Payload::FaceSet(d), NodeKind::Normals) => opt_state(d.normals, d.r_normals, child),
            (Payload::FaceSet(d), NodeKind::Colors) => opt_state(d.colors, d.r_colors, child),
            (Payload::FaceSet(d), NodeKind::CoordIndex) => opt_state(d.coord_index, None, child),
            _ => SlotState::Occupied,
        }
    }

    fn owned_insert(&mut self, parent: NodeId, child: NodeId) {
        let ck = self.kind(child);
        match (&mut self.node_mut(parent).payload, ck) {
            (Payload::Transform(d), NodeKind::Transform) => d.transforms.push(child),
            (Payload::Transform(d), NodeKind::Shape) => d.shapes.push(child),
            (Payload::Shape(d), NodeKind::Appearance) => d.appearance = Some(child),
            (Payload::Shape(d), NodeKind::FaceSet) => d.faceset = Some(child),
            (Payload::FaceSet(d), NodeKind::Coords) => d.coords = Some(child),
            (Payload::FaceSet(d), NodeKind::Normals) => d.normals = Some(child),
            (Payload::FaceSet(d), NodeKind::Colors) => d.colors = Some(child),
            (Payload::FaceSet(d), NodeKind::CoordIndex) => d.coord_index = Some(child),
            _ => unreachable!("owned_insert: illegal pairing"),
        }
    }

    fn ref_insert(&mut self, parent: NodeId, child: NodeId) {
        let ck = self.kind(child);
        match (&mut self.node_mut(parent).payload, ck) {
            (Payload::Transform(d), NodeKind::Transform) => d.r_transforms.push(child),
            (Payload::Transform(d), NodeKind::Shape) => d.r_shapes.push(child),
            (Payload::Shape(d), NodeKind::Appearance) => d.r_appearance = Some(child),
            (Payload::Shape(d), NodeKind::FaceSet) => d.r_faceset = Some(child),
            (Payload::FaceSet(d), NodeKind::Coords) => d.r_coords = Some(child),
            (Payload::FaceSet(d), NodeKind::Normals) => d.r_normals = Some(child),
            (Payload::FaceSet(d), NodeKind::Colors) => d.r_colors = Some(child),
            _ => unreachable!("ref_insert: illegal pairing"),
        }
    }

    /// Remove `child` from `parent`'s owned list or slot. Does not touch
    /// the child's parent field.
    fn unlink_child(&mut self, parent: NodeId, child: NodeId) {
        let ck = self.kind(child);
        match (&mut self.node_mut(parent).payload, ck) {
            (Payload::Transform(d), NodeKind::Transform) => d.transforms.retain(|&n| n != child),
            (Payload::Transform(d), NodeKind::Shape) => d.shapes.retain(|&n| n != child),
            (Payload::Shape(d), NodeKind::Appearance) => {
                if d.appearance == Some(child) {
                    d.appearance = None;
                }
            }
            (Payload::Shape(d), NodeKind::FaceSet) => {
                if d.faceset == Some(child) {
                    d.faceset = None;
                }
            }
            (Payload::FaceSet(d), kind) => {
                match kind {
                    NodeKind::Coords => {
                        if d.coords == Some(child) {
                            d.coords = None;
                        }
                    }
                    NodeKind::Normals => {
                        if d.normals == Some(child) {
                            d.normals = None;
                        }
                    }
                    NodeKind::Colors => {
                        if d.colors == Some(child) {
                            d.colors = None;
                        }
                    }
                    NodeKind::CoordIndex => {
                        if d.coord_index == Some(child) {
                            d.coord_index = None;
                        }
                    }
                    _ => {}
                }
                d.invalidate();
            }
            _ => {}
        }
    }

    /// Remove `child` from `parent`'s reference list or slot. Does not
    /// touch the child's back-reference list.
    fn unlink_ref(&mut self, parent: NodeId, child: NodeId) {
        let ck = self.kind(child);
        match (&mut self.node_mut(parent).payload, ck) {
            (Payload::Transform(d), NodeKind::Transform) => d.r_transforms.retain(|&n| n != child),
            (Payload::Transform(d), NodeKind::Shape) => d.r_shapes.retain(|&n| n != child),
            (Payload::Shape(d), NodeKind::Appearance) => {
                if d.r_appearance == Some(child) {
                    d.r_appearance = None;
                }
            }
            (Payload::Shape(d), NodeKind::FaceSet) => {
                if d.r_faceset == Some(child) {
                    d.r_faceset = None;
                }
            }
            (Payload::FaceSet(d), kind) => {
                match kind {
                    NodeKind::Coords => {
                        if d.r_coords == Some(child) {
                            d.r_coords = None;
                        }
                    }
                    NodeKind::Normals => {
                        if d.r_normals == Some(child) {
                            d.r_normals = None;
                        }
                    }
                    NodeKind::Colors => {
                        if d.r_colors == Some(child) {
                            d.r_colors = None;
                        }
                    }
                    _ => {}
                }
                d.invalidate();
            }
            _ => {}
        }
    }

    fn invalidate_faceset(&mut self, id: NodeId) {
        if let Payload::FaceSet(d) = &mut self.node_mut(id).payload {
            d.invalidate();
        }
    }
}

/// Area-weighted per-vertex normals over a triangle index list.
/// Out-of-range triangles are skipped.
fn vertex_normals(points: &[DVec3], indices: &[i32]) -> Vec<DVec3> {
    let mut acc = vec![DVec3::ZERO; points.len()];

    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        if a < 0 || b < 0 || c < 0 {
            continue;
        }
        let (a, b, c) = (a as usize, b as usize, c as usize);
        if a >= points.len() || b >= points.len() || c >= points.len() {
            continue;
        }
        let n = (points[b] - points[a]).cross(points[c] - points[a]);
        acc[a] += n;
        acc[b] += n;
        acc[c] += n;
    }

    acc.into_iter()
        .map(|v| v.normalize_or(DVec3::Z))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_faceset(scene: &mut Scene, shape: NodeId) -> NodeId {
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs)).unwrap();
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(1.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(0.0, 1.0, 0.0);
        let no = scene.new_node(NodeKind::Normals, Some(fs)).unwrap();
        for _ in 0..3 {
            scene.normals_mut(no).add_vector(0.0, 0.0, 1.0);
        }
        let ix = scene.new_node(NodeKind::CoordIndex, Some(fs)).unwrap();
        scene.coord_index_mut(ix).add_triangle(0, 1, 2);
        fs
    }

    #[test]
    fn test_legal_and_illegal_pairings() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let child = scene.new_node(NodeKind::Transform, Some(root)).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        assert_eq!(scene.parent(child), Some(root));
        assert_eq!(scene.parent(shape), Some(root));

        // a shape cannot parent a transform
        assert!(scene.new_node(NodeKind::Transform, Some(shape)).is_err());
        // a non-transform cannot be a root
        assert!(scene.new_node(NodeKind::Shape, None).is_err());
        // a transform cannot parent leaf data
        assert!(scene.new_node(NodeKind::Coords, Some(root)).is_err());

        // add_child_node rejects illegal kinds without mutation
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();
        assert!(!scene.add_child_node(fs, child));
        assert_eq!(scene.parent(child), Some(root));
    }

    #[test]
    fn test_slot_exclusivity() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();

        // a second face set on the same shape is rejected
        assert!(scene.new_node(NodeKind::FaceSet, Some(shape)).is_err());

        // a referenced face set cannot coexist with an owned one
        let shape2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs2 = scene.new_node(NodeKind::FaceSet, Some(shape2)).unwrap();
        assert!(!scene.add_ref_node(shape, fs2));

        // re-adding the node already in the slot is a no-op success
        assert!(scene.add_child_node(shape, fs));
    }

    #[test]
    fn test_set_parent_moves_between_transforms() {
        let mut scene = Scene::new();
        let a = scene.new_node(NodeKind::Transform, None).unwrap();
        let b = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(a)).unwrap();

        assert!(scene.set_parent(shape, Some(b), true));
        assert_eq!(scene.parent(shape), Some(b));
        assert!(scene.transform(a).child_shapes().is_empty());
        assert_eq!(scene.transform(b).child_shapes(), &[shape]);

        // illegal new parent: no mutation
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();
        assert!(!scene.set_parent(shape, Some(fs), true));
        assert_eq!(scene.parent(shape), Some(b));
    }

    #[test]
    fn test_destroy_unlinks_from_parent() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, shape);

        scene.destroy(fs);
        assert!(!scene.contains(fs));
        assert!(scene.shape(shape).owned_faceset().is_none());
        // leaf children went down with it
        assert_eq!(scene.node_count(), 2);
    }

    #[test]
    fn test_destroy_clears_all_referrers() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, s1);

        // zero, one and many referrers
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let s3 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        assert!(scene.add_ref_node(s2, fs));
        assert!(scene.add_ref_node(s3, fs));
        assert_eq!(scene.back_refs(fs), &[s2, s3]);

        scene.destroy(fs);
        assert!(scene.shape(s1).owned_faceset().is_none());
        assert!(scene.shape(s2).ref_faceset().is_none());
        assert!(scene.shape(s3).ref_faceset().is_none());
    }

    #[test]
    fn test_destroy_referrer_drops_back_ref() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, s1);
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        assert!(scene.add_ref_node(s2, fs));

        scene.destroy(s2);
        assert!(scene.back_refs(fs).is_empty());
    }

    #[test]
    fn test_stale_handle_detected() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        scene.destroy(shape);
        assert!(!scene.contains(shape));

        // a recycled slot gets a new generation
        let shape2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        assert_ne!(shape, shape2);
        assert!(scene.contains(shape2));
        assert!(!scene.contains(shape));
    }

    #[test]
    fn test_find_node_across_tree() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let t1 = scene.new_node(NodeKind::Transform, Some(root)).unwrap();
        let t2 = scene.new_node(NodeKind::Transform, Some(root)).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(t2)).unwrap();

        let mut namer = Namer::new();
        scene.rename_nodes(root, &mut namer);

        // from a leaf of one branch, a node in a sibling branch is found
        let name = scene.name(shape).to_owned();
        assert_eq!(scene.find_node(t1, &name, Some(t1)), Some(shape));
        // self lookup
        let root_name = scene.name(root).to_owned();
        assert_eq!(scene.find_node(root, &root_name, Some(root)), Some(root));
        // unknown names and empty names find nothing
        assert_eq!(scene.find_node(root, "TXFM_99", Some(root)), None);
        assert_eq!(scene.find_node(root, "", Some(root)), None);
    }

    #[test]
    fn test_swap_parent_moves_ownership() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, s1);
        assert!(scene.add_ref_node(s2, fs));

        assert!(scene.swap_parent(fs, s2));
        assert_eq!(scene.parent(fs), Some(s2));
        assert_eq!(scene.shape(s2).owned_faceset(), Some(fs));
        assert!(scene.shape(s2).ref_faceset().is_none());
        // old owner keeps access through a reference
        assert_eq!(scene.shape(s1).ref_faceset(), Some(fs));
        assert_eq!(scene.back_refs(fs), &[s1]);

        // swapping to a non-referrer fails
        let s3 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        assert!(!scene.swap_parent(fs, s3));
        assert_eq!(scene.parent(fs), Some(s2));
    }

    #[test]
    fn test_wrapper_nulled_on_destroy() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();

        let w = scene.associate_wrapper(shape);
        assert_eq!(w.node(), Some(shape));
        assert!(w.is_live());

        scene.destroy(shape);
        assert_eq!(w.node(), None);
        assert!(!w.is_live());
    }

    #[test]
    fn test_wrapper_release_and_reassociate() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let w = scene.associate_wrapper(root);
        scene.disassociate_wrapper(root, &w);

        // after release a new association is allowed
        let w2 = scene.associate_wrapper(root);
        assert!(w2.is_live());
        // the released wrapper is no longer auto-nulled
        scene.destroy(root);
        assert_eq!(w2.node(), None);
        assert_eq!(w.node(), Some(root));
    }

    #[test]
    #[should_panic(expected = "already has an associated wrapper")]
    fn test_double_association_panics() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let _w1 = scene.associate_wrapper(root);
        let _w2 = scene.associate_wrapper(root);
    }

    #[test]
    fn test_validate_minimal_triangle() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, shape);
        assert!(scene.validate_faceset(fs));
        // memoized
        assert!(scene.validate_faceset(fs));
    }

    #[test]
    fn test_validate_failures() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();

        // two coordinates
        let s = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = scene.new_node(NodeKind::FaceSet, Some(s)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs)).unwrap();
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(1.0, 0.0, 0.0);
        let no = scene.new_node(NodeKind::Normals, Some(fs)).unwrap();
        scene.normals_mut(no).add_vector(0.0, 0.0, 1.0);
        scene.normals_mut(no).add_vector(0.0, 0.0, 1.0);
        let ix = scene.new_node(NodeKind::CoordIndex, Some(fs)).unwrap();
        scene.coord_index_mut(ix).add_triangle(0, 1, 1);
        assert!(!scene.validate_faceset(fs));

        // index count not a multiple of 3
        let s = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, s);
        let ix = scene.faceset(fs).coord_index().unwrap();
        scene.coord_index_mut(ix).indices.push(0);
        scene.add_child_node(fs, ix); // re-add invalidates the memo
        assert!(!scene.validate_faceset(fs));

        // index out of range
        let s = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, s);
        let ix = scene.faceset(fs).coord_index().unwrap();
        scene.coord_index_mut(ix).indices[2] = 3;
        scene.add_child_node(fs, ix);
        assert!(!scene.validate_faceset(fs));

        // normal count mismatch
        let s = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, s);
        let no = scene.faceset(fs).owned_normals().unwrap();
        scene.normals_mut(no).add_vector(0.0, 0.0, 1.0);
        scene.add_child_node(fs, no);
        assert!(!scene.validate_faceset(fs));

        // colors present but fewer than vertices
        let s = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = triangle_faceset(&mut scene, s);
        let col = scene.new_node(NodeKind::Colors, Some(fs)).unwrap();
        scene.colors_mut(col).add_color(1.0, 0.0, 0.0);
        assert!(!scene.validate_faceset(fs));
    }

    #[test]
    fn test_calc_normals_plain() {
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let shape = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs = scene.new_node(NodeKind::FaceSet, Some(shape)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs)).unwrap();
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(1.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(0.0, 1.0, 0.0);
        let ix = scene.new_node(NodeKind::CoordIndex, Some(fs)).unwrap();
        scene.coord_index_mut(ix).add_triangle(0, 1, 2);

        assert!(scene.calc_normals(fs));
        let no = scene.faceset(fs).owned_normals().unwrap();
        let vecs = &scene.normals(no).vectors;
        assert_eq!(vecs.len(), 3);
        for v in vecs {
            assert!((*v - DVec3::Z).length() < 1e-12);
        }
        assert!(scene.validate_faceset(fs));
    }

    #[test]
    fn test_calc_normals_gathers_referrer_indices() {
        // one coordinate list shared by two face sets; the computed normals
        // must account for the triangles of both
        let mut scene = Scene::new();
        let root = scene.new_node(NodeKind::Transform, None).unwrap();
        let s1 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs1 = scene.new_node(NodeKind::FaceSet, Some(s1)).unwrap();
        let co = scene.new_node(NodeKind::Coords, Some(fs1)).unwrap();
        // a square folded 90 degrees along the x axis
        scene.coords_mut(co).add_point(0.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(1.0, 0.0, 0.0);
        scene.coords_mut(co).add_point(0.0, 1.0, 0.0);
        scene.coords_mut(co).add_point(0.0, 0.0, 1.0);
        let ix1 = scene.new_node(NodeKind::CoordIndex, Some(fs1)).unwrap();
        scene.coord_index_mut(ix1).add_triangle(0, 1, 2);

        let s2 = scene.new_node(NodeKind::Shape, Some(root)).unwrap();
        let fs2 = scene.new_node(NodeKind::FaceSet, Some(s2)).unwrap();
        assert!(scene.add_ref_node(fs2, co));
        let ix2 = scene.new_node(NodeKind::CoordIndex, Some(fs2)).unwrap();
        scene.coord_index_mut(ix2).add_triangle(0, 3, 1);

        assert!(scene.calc_normals(fs1));
        let no = scene.faceset(fs1).owned_normals().unwrap();
        let vecs = scene.normals(no).vectors.clone();
        assert_eq!(vecs.len(), 4);
        // shared vertices 0 and 1 average both face normals (+Z and +Y)
        let expect = DVec3::new(0.0, 1.0, 1.0).normalize();
        assert!((vecs[0] - expect).length() < 1e-9);
        assert!((vecs[1] - expect).length() < 1e-9);
        // unshared vertices keep their own face normal
        assert!((vecs[2] - DVec3::Z).length() < 1e-9);
        assert!((vecs[3] - DVec3::Y).length() < 1e-9);
    }
}
