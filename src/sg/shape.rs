//! Shape node data: one appearance slot and one face set slot.

use super::NodeId;

/// A Shape node. Each slot holds either an owned child or a reference to a
/// node owned elsewhere, never both.
#[derive(Clone, Debug, Default)]
pub struct ShapeData {
    pub(crate) appearance: Option<NodeId>,
    pub(crate) r_appearance: Option<NodeId>,
    pub(crate) faceset: Option<NodeId>,
    pub(crate) r_faceset: Option<NodeId>,
}

impl ShapeData {
    /// The effective appearance: owned if present, else referenced.
    pub fn effective_appearance(&self) -> Option<NodeId> {
        self.appearance.or(self.r_appearance)
    }

    /// The effective face set: owned if present, else referenced.
    pub fn effective_faceset(&self) -> Option<NodeId> {
        self.faceset.or(self.r_faceset)
    }

    /// Owned appearance child.
    pub fn owned_appearance(&self) -> Option<NodeId> {
        self.appearance
    }

    /// Referenced appearance.
    pub fn ref_appearance(&self) -> Option<NodeId> {
        self.r_appearance
    }

    /// Owned face set child.
    pub fn owned_faceset(&self) -> Option<NodeId> {
        self.faceset
    }

    /// Referenced face set.
    pub fn ref_faceset(&self) -> Option<NodeId> {
        self.r_faceset
    }

    /// True if no slot is filled.
    pub fn is_empty(&self) -> bool {
        self.appearance.is_none()
            && self.r_appearance.is_none()
            && self.faceset.is_none()
            && self.r_faceset.is_none()
    }
}
