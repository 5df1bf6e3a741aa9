//! Face set node data: slots for the leaf data nodes plus the memoized
//! validity flags.
//!
//! Validation and normal calculation need access to the other nodes in the
//! arena and therefore live on [`Scene`](super::Scene)
//! ([`validate_faceset`](super::Scene::validate_faceset),
//! [`calc_normals`](super::Scene::calc_normals)).

use super::NodeId;

/// A FaceSet node.
///
/// Coordinate, normal and color slots hold either an owned child or a
/// reference, never both. The index list is always owned; the on-disk
/// format has no slot for a referenced index list.
#[derive(Clone, Debug, Default)]
pub struct FaceSetData {
    pub(crate) coords: Option<NodeId>,
    pub(crate) r_coords: Option<NodeId>,
    pub(crate) normals: Option<NodeId>,
    pub(crate) r_normals: Option<NodeId>,
    pub(crate) colors: Option<NodeId>,
    pub(crate) r_colors: Option<NodeId>,
    pub(crate) coord_index: Option<NodeId>,

    /// Memoized result of the last validation.
    pub(crate) valid: bool,
    /// True once `valid` holds a computed result; cleared on any slot change.
    pub(crate) validated: bool,
}

impl FaceSetData {
    /// The effective coordinate node: owned if present, else referenced.
    pub fn effective_coords(&self) -> Option<NodeId> {
        self.coords.or(self.r_coords)
    }

    /// The effective normal node.
    pub fn effective_normals(&self) -> Option<NodeId> {
        self.normals.or(self.r_normals)
    }

    /// The effective color node.
    pub fn effective_colors(&self) -> Option<NodeId> {
        self.colors.or(self.r_colors)
    }

    /// The owned index list.
    pub fn coord_index(&self) -> Option<NodeId> {
        self.coord_index
    }

    /// Owned coordinate child.
    pub fn owned_coords(&self) -> Option<NodeId> {
        self.coords
    }

    /// Referenced coordinate node.
    pub fn ref_coords(&self) -> Option<NodeId> {
        self.r_coords
    }

    /// Owned normal child.
    pub fn owned_normals(&self) -> Option<NodeId> {
        self.normals
    }

    /// Referenced normal node.
    pub fn ref_normals(&self) -> Option<NodeId> {
        self.r_normals
    }

    /// Owned color child.
    pub fn owned_colors(&self) -> Option<NodeId> {
        self.colors
    }

    /// Referenced color node.
    pub fn ref_colors(&self) -> Option<NodeId> {
        self.r_colors
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
        self.validated = false;
    }
}
