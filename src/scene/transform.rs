// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Local transform with lazily cached matrices.
//!
//! The scene marks a transform's world matrix dirty whenever the transform or
//! any ancestor changes; the matrix is recomputed on the next read.

use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::math::{Mat4, Quat, Vec3};

/// Position, rotation and scale relative to the parent entity
#[derive(Clone, Debug)]
pub struct Transform {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
    local: Cell<Option<Mat4>>,
    world: Cell<Mat4>,
    world_inverse: Cell<Option<Mat4>>,
    world_dirty: Cell<bool>,
    /// Set by every local mutation, consumed by the scene
    changed: bool,
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
            local: Cell::new(None),
            world: Cell::new(Mat4::IDENTITY),
            world_inverse: Cell::new(None),
            world_dirty: Cell::new(true),
            changed: false,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::ZERO, Quat::IDENTITY, Vec3::ONE)
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY, Vec3::ONE)
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self.local.set(None);
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self.local.set(None);
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.touch();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation.normalize();
        self.touch();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.touch();
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
        self.touch();
    }

    /// Apply `rotation` after the current one
    pub fn rotate(&mut self, rotation: Quat) {
        self.rotation = (rotation * self.rotation).normalize();
        self.touch();
    }

    /// Local -Z in parent space
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Translation × rotation × scale, cached until the next mutation
    pub fn local_matrix(&self) -> Mat4 {
        if let Some(matrix) = self.local.get() {
            return matrix;
        }
        let matrix = Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position);
        self.local.set(Some(matrix));
        matrix
    }

    pub fn is_world_dirty(&self) -> bool {
        self.world_dirty.get()
    }

    pub(crate) fn mark_world_dirty(&self) {
        self.world_dirty.set(true);
        self.world_inverse.set(None);
    }

    pub(crate) fn cached_world(&self) -> Option<Mat4> {
        (!self.world_dirty.get()).then(|| self.world.get())
    }

    pub(crate) fn store_world(&self, matrix: Mat4) {
        self.world.set(matrix);
        self.world_inverse.set(None);
        self.world_dirty.set(false);
    }

    /// Inverse of the stored world matrix, computed once per clean world matrix.
    /// `None` while the world matrix is dirty.
    pub(crate) fn cached_world_inverse(&self) -> Option<Mat4> {
        if self.world_dirty.get() {
            return None;
        }
        if let Some(inverse) = self.world_inverse.get() {
            return Some(inverse);
        }
        let inverse = self.world.get().inverse();
        self.world_inverse.set(Some(inverse));
        Some(inverse)
    }

    pub(crate) fn has_cached_inverse(&self) -> bool {
        self.world_inverse.get().is_some()
    }

    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    fn touch(&mut self) {
        self.local.set(None);
        self.world_dirty.set(true);
        self.world_inverse.set(None);
        self.changed = true;
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.rotation == other.rotation
            && self.scale == other.scale
    }
}

/// Plain-data form used by scene snapshots
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformData {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl From<&Transform> for TransformData {
    fn from(transform: &Transform) -> Self {
        Self {
            position: transform.position,
            rotation: transform.rotation,
            scale: transform.scale,
        }
    }
}

impl From<TransformData> for Transform {
    fn from(data: TransformData) -> Self {
        Transform::new(data.position, data.rotation, data.scale)
    }
}
