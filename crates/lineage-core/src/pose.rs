//! Spatial transforms.
//!
//! A [`Pose`] is translation, rotation and scale, backed by
//! [glam](https://docs.rs/glam). Local poses are relative to the scene-graph
//! parent; concatenating a parent's global pose with a child's local pose
//! (`parent.mul_pose(&child)`) yields the child's global pose.

use std::ops::Mul;

pub use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Translation, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Pose {
    /// Origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// A pure translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// A pure translation from components.
    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        Self::from_translation(Vec3::new(x, y, z))
    }

    /// A pure rotation.
    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    /// A rotation of `angle` radians about `axis` (normalized internally).
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        Self::from_rotation(Quat::from_axis_angle(axis.normalize(), angle))
    }

    /// Return a copy with the given scale.
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// The 4x4 affine matrix (scale, then rotate, then translate).
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Decompose an affine matrix. Shear is lost.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// Concatenate: `child` is expressed in `self`'s coordinate space.
    pub fn mul_pose(&self, child: &Pose) -> Pose {
        Self::from_matrix(self.matrix() * child.matrix())
    }

    /// Map a point from this pose's local space into its parent space.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.matrix().transform_point3(point)
    }

    /// Component-wise comparison within `max_abs_diff`. `q` and `-q` encode
    /// the same rotation and compare equal.
    pub fn abs_diff_eq(&self, other: &Pose, max_abs_diff: f32) -> bool {
        let same_rotation = self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
            || self.rotation.abs_diff_eq(-other.rotation, max_abs_diff);
        same_rotation
            && self.translation.abs_diff_eq(other.translation, max_abs_diff)
            && self.scale.abs_diff_eq(other.scale, max_abs_diff)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Pose {
    type Output = Pose;

    fn mul(self, child: Pose) -> Pose {
        self.mul_pose(&child)
    }
}
