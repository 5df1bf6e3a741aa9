//! Transform node data and VRML transform composition.

use glam::{DMat4, DVec3};

use super::NodeId;

/// Rotation as a normalized axis plus an angle in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisAngle {
    pub axis: DVec3,
    pub angle: f64,
}

impl AxisAngle {
    pub fn new(axis: DVec3, angle: f64) -> Self {
        AxisAngle { axis, angle }
    }

    /// Rotation matrix; a zero angle or a degenerate axis yields identity.
    pub fn matrix(&self) -> DMat4 {
        if self.angle == 0.0 || self.axis.length_squared() < 1e-24 {
            return DMat4::IDENTITY;
        }

        DMat4::from_axis_angle(self.axis.normalize(), self.angle)
    }

    /// The inverse rotation.
    pub fn inverse(&self) -> AxisAngle {
        AxisAngle {
            axis: self.axis,
            angle: -self.angle,
        }
    }
}

impl Default for AxisAngle {
    fn default() -> Self {
        // VRML default rotation: 0 0 1 0
        AxisAngle {
            axis: DVec3::Z,
            angle: 0.0,
        }
    }
}

/// A Transform node: the VRML2.0 `Transform` fields plus the ordered lists
/// of owned and referenced children.
#[derive(Clone, Debug)]
pub struct TransformData {
    pub center: DVec3,
    pub translation: DVec3,
    pub rotation: AxisAngle,
    pub scale: DVec3,
    pub scale_orientation: AxisAngle,

    /// Owned child transforms, in insertion order.
    pub(crate) transforms: Vec<NodeId>,
    /// Referenced child transforms.
    pub(crate) r_transforms: Vec<NodeId>,
    /// Owned child shapes.
    pub(crate) shapes: Vec<NodeId>,
    /// Referenced child shapes.
    pub(crate) r_shapes: Vec<NodeId>,
}

impl Default for TransformData {
    /// VRML2.0 `Transform` field defaults (unit scale, identity rotation).
    fn default() -> Self {
        TransformData {
            center: DVec3::ZERO,
            translation: DVec3::ZERO,
            rotation: AxisAngle::default(),
            scale: DVec3::ONE,
            scale_orientation: AxisAngle::default(),
            transforms: Vec::new(),
            r_transforms: Vec::new(),
            shapes: Vec::new(),
            r_shapes: Vec::new(),
        }
    }
}

impl TransformData {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node's local transform.
    ///
    /// VRML2.0 `Transform` semantics: a point is transformed by
    /// `P' = T · C · R · SR · S · SR⁻¹ · C⁻¹ · P`, i.e. the scale is
    /// applied about `center` in the `scaleOrientation` frame, then the
    /// rotation about `center`, then the translation. This is not the
    /// plain translate-rotate-scale order; the composition is part of the
    /// format contract.
    pub fn local_matrix(&self) -> DMat4 {
        let t = DMat4::from_translation(self.translation);
        let c = DMat4::from_translation(self.center);
        let nc = DMat4::from_translation(-self.center);
        let r = self.rotation.matrix();
        let sr = self.scale_orientation.matrix();
        let nsr = self.scale_orientation.inverse().matrix();
        let s = DMat4::from_scale(self.scale);

        t * c * r * sr * s * nsr * nc
    }

    /// True if the node has neither owned nor referenced children.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
            && self.r_transforms.is_empty()
            && self.shapes.is_empty()
            && self.r_shapes.is_empty()
    }

    /// Owned child transforms.
    pub fn child_transforms(&self) -> &[NodeId] {
        &self.transforms
    }

    /// Referenced child transforms.
    pub fn ref_transforms(&self) -> &[NodeId] {
        &self.r_transforms
    }

    /// Owned child shapes.
    pub fn child_shapes(&self) -> &[NodeId] {
        &self.shapes
    }

    /// Referenced child shapes.
    pub fn ref_shapes(&self) -> &[NodeId] {
        &self.r_shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec4;

    fn apply(m: &DMat4, p: DVec3) -> DVec3 {
        (*m * DVec4::new(p.x, p.y, p.z, 1.0)).truncate()
    }

    #[test]
    fn test_translation_only() {
        let mut t = TransformData::new();
        t.translation = DVec3::new(10.0, 0.0, 0.0);
        let p = apply(&t.local_matrix(), DVec3::ZERO);
        assert!((p - DVec3::new(10.0, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_scale_about_center() {
        // Scaling x2 about center (1,0,0): the origin sits one unit left of
        // the center, so it ends up two units left of it, at (-1,0,0).
        // A naive T*R*S composition would leave the origin fixed.
        let mut t = TransformData::new();
        t.center = DVec3::new(1.0, 0.0, 0.0);
        t.scale = DVec3::new(2.0, 1.0, 1.0);
        let p = apply(&t.local_matrix(), DVec3::ZERO);
        assert!((p - DVec3::new(-1.0, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_rotation_about_center() {
        // 180 degrees about Z, centered at (1,0,0): origin maps to (2,0,0).
        let mut t = TransformData::new();
        t.center = DVec3::new(1.0, 0.0, 0.0);
        t.rotation = AxisAngle::new(DVec3::Z, std::f64::consts::PI);
        let p = apply(&t.local_matrix(), DVec3::ZERO);
        assert!((p - DVec3::new(2.0, 0.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn test_scale_orientation_frame() {
        // Scale x2 along an axis rotated 90 degrees about Z: the scale acts
        // along world Y, so (0,1,0) maps to (0,2,0) and (1,0,0) is fixed.
        let mut t = TransformData::new();
        t.scale = DVec3::new(2.0, 1.0, 1.0);
        t.scale_orientation = AxisAngle::new(DVec3::Z, std::f64::consts::FRAC_PI_2);
        let m = t.local_matrix();
        let py = apply(&m, DVec3::Y);
        let px = apply(&m, DVec3::X);
        assert!((py - DVec3::new(0.0, 2.0, 0.0)).length() < 1e-9);
        assert!((px - DVec3::X).length() < 1e-9);
    }

    #[test]
    fn test_degenerate_axis_is_identity() {
        let r = AxisAngle::new(DVec3::ZERO, 1.0);
        assert_eq!(r.matrix(), DMat4::IDENTITY);
    }
}
