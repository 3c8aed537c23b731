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

//! Render queues and the renderer seam
//!
//! The culled set is split into three queues and drawn in this order:
//! - Opaque: layer, then front to back
//! - Transparent: layer, then back to front
//! - Overlay: submission order

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::assets::AssetId;
use crate::math::{Aabb, Frustum, Mat4, Vec3};
use crate::resources::{CachedResourceManager, Handle, MaterialResource, MeshResource};
use crate::scene::entity::EntityId;

/// Queues above this size are sorted with rayon
pub const PARALLEL_SORT_THRESHOLD: usize = 2048;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderQueueKind {
    #[default]
    Opaque,
    Transparent,
    Overlay,
}

impl RenderQueueKind {
    pub const DRAW_ORDER: [RenderQueueKind; 3] = [
        RenderQueueKind::Opaque,
        RenderQueueKind::Transparent,
        RenderQueueKind::Overlay,
    ];
}

/// One visible renderable for this frame
#[derive(Clone, Debug)]
pub struct RenderItem {
    pub entity: EntityId,
    pub mesh: AssetId,
    pub material: Option<AssetId>,
    pub world_matrix: Mat4,
    pub world_bounds: Aabb,
    pub layer: u32,
    /// Squared distance from the camera to the bounds center
    pub distance_squared: f32,
    /// Submission order
    pub sequence: u64,
}

fn front_to_back(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.layer
        .cmp(&b.layer)
        .then(a.distance_squared.total_cmp(&b.distance_squared))
        .then(a.sequence.cmp(&b.sequence))
}

fn back_to_front(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.layer
        .cmp(&b.layer)
        .then(b.distance_squared.total_cmp(&a.distance_squared))
        .then(a.sequence.cmp(&b.sequence))
}

#[cfg(feature = "parallel")]
fn sort_queue(items: &mut [RenderItem], compare: fn(&RenderItem, &RenderItem) -> Ordering) {
    use rayon::prelude::*;

    if items.len() >= PARALLEL_SORT_THRESHOLD {
        items.par_sort_unstable_by(compare);
    } else {
        items.sort_unstable_by(compare);
    }
}

#[cfg(not(feature = "parallel"))]
fn sort_queue(items: &mut [RenderItem], compare: fn(&RenderItem, &RenderItem) -> Ordering) {
    items.sort_unstable_by(compare);
}

/// Per-frame render queues
#[derive(Debug, Default)]
pub struct RenderQueues {
    opaque: Vec<RenderItem>,
    transparent: Vec<RenderItem>,
    overlay: Vec<RenderItem>,
}

impl RenderQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
        self.overlay.clear();
    }

    pub fn push(&mut self, kind: RenderQueueKind, item: RenderItem) {
        match kind {
            RenderQueueKind::Opaque => self.opaque.push(item),
            RenderQueueKind::Transparent => self.transparent.push(item),
            RenderQueueKind::Overlay => self.overlay.push(item),
        }
    }

    pub fn sort(&mut self) {
        sort_queue(&mut self.opaque, front_to_back);
        sort_queue(&mut self.transparent, back_to_front);
        // sequence values are unique, so an unstable sort keeps submission order
        self.overlay.sort_unstable_by_key(|item| item.sequence);
    }

    pub fn queue(&self, kind: RenderQueueKind) -> &[RenderItem] {
        match kind {
            RenderQueueKind::Opaque => &self.opaque,
            RenderQueueKind::Transparent => &self.transparent,
            RenderQueueKind::Overlay => &self.overlay,
        }
    }

    pub fn opaque(&self) -> &[RenderItem] {
        &self.opaque
    }

    pub fn transparent(&self) -> &[RenderItem] {
        &self.transparent
    }

    pub fn overlay(&self) -> &[RenderItem] {
        &self.overlay
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len() + self.overlay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every item in draw order
    pub fn iter(&self) -> impl Iterator<Item = (RenderQueueKind, &RenderItem)> {
        RenderQueueKind::DRAW_ORDER
            .into_iter()
            .flat_map(move |kind| self.queue(kind).iter().map(move |item| (kind, item)))
    }
}

/// Draw submission with its resources already resolved from the cache
pub struct DrawCall<'a> {
    pub queue: RenderQueueKind,
    pub item: &'a RenderItem,
    pub mesh: Handle<MeshResource>,
    pub material: Option<Handle<MaterialResource>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub submitted: usize,
    pub drawn: usize,
    /// Items whose mesh or material is not in the cache this frame
    pub skipped: usize,
}

/// Backend seam
pub trait Renderer {
    fn begin_frame(&mut self, _camera_position: Vec3) {}

    fn draw(&mut self, call: &DrawCall<'_>);

    fn end_frame(&mut self, _stats: &RenderStats) {}
}

/// Draws every queue through `renderer`, skipping items with missing assets
pub fn execute(
    queues: &RenderQueues,
    camera_position: Vec3,
    renderer: &mut dyn Renderer,
    resources: &CachedResourceManager,
) -> RenderStats {
    let mut stats = RenderStats::default();
    renderer.begin_frame(camera_position);

    for (queue, item) in queues.iter() {
        stats.submitted += 1;
        let Some(mesh) = resources.get_resource::<MeshResource>(&item.mesh) else {
            tracing::trace!(entity = ?item.entity, mesh = %item.mesh, "mesh not resident, skipped");
            stats.skipped += 1;
            continue;
        };
        let material = match &item.material {
            Some(id) => match resources.get_resource::<MaterialResource>(id) {
                Some(handle) => Some(handle),
                None => {
                    tracing::trace!(entity = ?item.entity, material = %id, "material not resident, skipped");
                    stats.skipped += 1;
                    continue;
                }
            },
            None => None,
        };
        renderer.draw(&DrawCall {
            queue,
            item,
            mesh,
            material,
        });
        stats.drawn += 1;
    }

    renderer.end_frame(&stats);
    stats
}

/// Renderer that records what it was asked to draw
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    pub frames: u64,
    pub draws: Vec<(RenderQueueKind, EntityId)>,
    pub last_stats: RenderStats,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for HeadlessRenderer {
    fn begin_frame(&mut self, _camera_position: Vec3) {
        self.frames += 1;
        self.draws.clear();
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        self.draws.push((call.queue, call.item.entity));
    }

    fn end_frame(&mut self, stats: &RenderStats) {
        self.last_stats = *stats;
    }
}

/// Perspective camera
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Camera {
    pub fn perspective(
        position: Vec3,
        target: Vec3,
        fov_y_radians: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            position,
            view: Mat4::look_at_rh(position, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_radians, aspect, near, far),
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }
}
