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

//! Octree over entity world bounds
//!
//! Each entity lives at the deepest node whose box fully contains its bounds,
//! so boxes straddling an octant boundary stay on the interior node. The root
//! is the only node that may hold a box it does not contain (when dynamic
//! expansion is off); queries always test the root's occupants one by one.

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::{smallvec, SmallVec};

use crate::config::OctreeConfig;
use crate::error::{PipelineError, Result};
use crate::math::{Aabb, Containment, Frustum, Ray, Sphere};
use crate::scene::entity::EntityId;

new_key_type! {
    struct NodeId;
}

struct OctreeNode {
    bounds: Aabb,
    depth: u32,
    parent: Option<NodeId>,
    children: Option<[NodeId; 8]>,
    entities: SmallVec<[EntityId; 8]>,
    /// Occupants of this node and every descendant
    subtree_count: usize,
}

impl OctreeNode {
    fn new(bounds: Aabb, depth: u32, parent: Option<NodeId>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: None,
            entities: SmallVec::new(),
            subtree_count: 0,
        }
    }
}

/// Shape of the tree at a point in time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OctreeStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: u32,
    pub entity_count: usize,
    pub max_entities_in_node: usize,
    /// Root rebuilds caused by dynamic expansion
    pub rebuilds: usize,
}

/// Spatial index of entity bounds
pub struct Octree {
    config: OctreeConfig,
    nodes: SlotMap<NodeId, OctreeNode>,
    root: NodeId,
    locations: FxHashMap<EntityId, NodeId>,
    bounds: FxHashMap<EntityId, Aabb>,
    /// Re-insertions deferred until `end_batch_update`
    pending: Option<FxHashMap<EntityId, Aabb>>,
    rebuilds: usize,
}

fn is_finite(bounds: &Aabb) -> bool {
    bounds.min.is_finite() && bounds.max.is_finite()
}

impl Octree {
    pub fn new(root_bounds: Aabb, mut config: OctreeConfig) -> Self {
        config.max_entities_per_node = config.max_entities_per_node.max(1);
        config.expansion_factor = config.expansion_factor.max(1.0);

        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(OctreeNode::new(root_bounds, 0, None));
        Self {
            config,
            nodes,
            root,
            locations: FxHashMap::default(),
            bounds: FxHashMap::default(),
            pending: None,
            rebuilds: 0,
        }
    }

    pub fn config(&self) -> &OctreeConfig {
        &self.config
    }

    pub fn root_bounds(&self) -> Aabb {
        self.nodes[self.root].bounds
    }

    /// Indexed entities, deferred batch updates included
    pub fn len(&self) -> usize {
        self.locations.len() + self.pending.as_ref().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.locations.contains_key(&entity)
            || self
                .pending
                .as_ref()
                .is_some_and(|p| p.contains_key(&entity))
    }

    pub fn entity_bounds(&self, entity: EntityId) -> Option<Aabb> {
        self.bounds
            .get(&entity)
            .or_else(|| self.pending.as_ref()?.get(&entity))
            .copied()
    }

    /// Entities currently placed in the tree
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, Aabb)> + '_ {
        self.bounds.iter().map(|(e, b)| (*e, *b))
    }

    pub fn insert(&mut self, entity: EntityId, bounds: Aabb) {
        if let Some(pending) = &mut self.pending {
            pending.remove(&entity);
        }
        if self.locations.contains_key(&entity) {
            self.detach(entity);
        }

        if !self.root_bounds().contains_aabb(&bounds) {
            if !is_finite(&bounds) {
                tracing::warn!(?entity, "non-finite bounds kept at the octree root");
            } else if self.config.dynamic_expansion {
                self.expand_to_fit(&bounds);
            }
        }
        self.place(entity, bounds);
    }

    /// Returns `false` if the entity was not indexed
    pub fn remove(&mut self, entity: EntityId) -> bool {
        let was_pending = self
            .pending
            .as_mut()
            .is_some_and(|p| p.remove(&entity).is_some());
        self.detach(entity) || was_pending
    }

    /// Move an entity to new bounds. In batch mode the re-insertion waits for
    /// [`Octree::end_batch_update`].
    pub fn update(&mut self, entity: EntityId, bounds: Aabb) {
        if let Some(pending) = &mut self.pending {
            pending.insert(entity, bounds);
            self.detach(entity);
            return;
        }

        if let Some(&node_id) = self.locations.get(&entity) {
            let node = &self.nodes[node_id];
            let still_fits = node.bounds.contains_aabb(&bounds)
                && (node.children.is_none() || node.bounds.octant_containing(&bounds).is_none());
            if still_fits {
                self.bounds.insert(entity, bounds);
                return;
            }
        }
        self.insert(entity, bounds);
    }

    pub fn begin_batch_update(&mut self) {
        if self.pending.is_none() {
            self.pending = Some(FxHashMap::default());
        }
    }

    pub fn is_batching(&self) -> bool {
        self.pending.is_some()
    }

    /// Re-insert everything deferred since `begin_batch_update`
    pub fn end_batch_update(&mut self) -> usize {
        let Some(pending) = self.pending.take() else {
            return 0;
        };
        let count = pending.len();
        for (entity, bounds) in pending {
            self.insert(entity, bounds);
        }
        count
    }

    /// Drop every entity, keeping the current root bounds
    pub fn clear(&mut self) {
        let root_bounds = self.root_bounds();
        self.nodes.clear();
        self.root = self.nodes.insert(OctreeNode::new(root_bounds, 0, None));
        self.locations.clear();
        self.bounds.clear();
        if let Some(pending) = &mut self.pending {
            pending.clear();
        }
    }

    pub fn query_frustum(&self, frustum: &Frustum) -> Vec<EntityId> {
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("octree_query_frustum", entities = self.locations.len()).entered();

        let mut out = Vec::new();
        let mut stack: SmallVec<[(NodeId, bool); 64]> = smallvec![(self.root, false)];
        while let Some((id, inside)) = stack.pop() {
            let node = &self.nodes[id];
            let is_root = id == self.root;
            let containment = if inside {
                Containment::Inside
            } else {
                frustum.classify_aabb(&node.bounds)
            };

            match (containment, is_root) {
                (Containment::Outside, false) => continue,
                (Containment::Inside, false) => out.extend(node.entities.iter().copied()),
                _ => out.extend(node.entities.iter().copied().filter(|e| {
                    self.bounds
                        .get(e)
                        .is_some_and(|b| frustum.intersects_aabb(b))
                })),
            }

            if containment == Containment::Outside {
                continue;
            }
            if let Some(children) = node.children {
                let children_inside = containment == Containment::Inside;
                stack.extend(children.iter().map(|c| (*c, children_inside)));
            }
        }
        out
    }

    pub fn query_aabb(&self, area: &Aabb) -> Vec<EntityId> {
        let mut out = Vec::new();
        self.query_with(|b| b.intersects_aabb(area), &mut out);
        out
    }

    pub fn query_sphere(&self, sphere: &Sphere) -> Vec<EntityId> {
        let mut out = Vec::new();
        self.query_with(|b| sphere.intersects_aabb(b), &mut out);
        out
    }

    /// Hits within `max_distance`, nearest first
    pub fn query_ray(&self, ray: &Ray, max_distance: f32) -> Vec<(EntityId, f32)> {
        let mut hits = Vec::new();
        let mut stack: SmallVec<[NodeId; 64]> = smallvec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            let node_hit = ray
                .intersect_aabb(&node.bounds)
                .is_some_and(|t| t <= max_distance);
            if !node_hit && id != self.root {
                continue;
            }
            for entity in &node.entities {
                let Some(bounds) = self.bounds.get(entity) else {
                    continue;
                };
                if let Some(t) = ray.intersect_aabb(bounds).filter(|t| *t <= max_distance) {
                    hits.push((*entity, t));
                }
            }
            if node_hit {
                if let Some(children) = node.children {
                    stack.extend(children);
                }
            }
        }
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    pub fn stats(&self) -> OctreeStats {
        let mut stats = OctreeStats {
            node_count: self.nodes.len(),
            entity_count: self.locations.len(),
            rebuilds: self.rebuilds,
            ..OctreeStats::default()
        };
        for node in self.nodes.values() {
            if node.children.is_none() {
                stats.leaf_count += 1;
            }
            stats.max_depth = stats.max_depth.max(node.depth);
            stats.max_entities_in_node = stats.max_entities_in_node.max(node.entities.len());
        }
        stats
    }

    /// Check every structural invariant of the tree
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Scene(format!("octree invalid: {msg}")));

        for (entity, node_id) in &self.locations {
            let Some(node) = self.nodes.get(*node_id) else {
                return fail(format!("{entity:?} points at a removed node"));
            };
            let occurrences = node.entities.iter().filter(|e| *e == entity).count();
            if occurrences != 1 {
                return fail(format!("{entity:?} listed {occurrences} times in its node"));
            }
            if !self.bounds.contains_key(entity) {
                return fail(format!("{entity:?} has no stored bounds"));
            }
        }

        let placed: usize = self.nodes.values().map(|n| n.entities.len()).sum();
        if placed != self.locations.len() || self.bounds.len() != self.locations.len() {
            return fail(format!(
                "{placed} occupants, {} locations, {} bounds",
                self.locations.len(),
                self.bounds.len()
            ));
        }

        for (id, node) in &self.nodes {
            let mut expected = node.entities.len();
            if let Some(children) = node.children {
                for child in children {
                    let Some(child_node) = self.nodes.get(child) else {
                        return fail("dangling child link".to_string());
                    };
                    if child_node.parent != Some(id) {
                        return fail("child does not point back at its parent".to_string());
                    }
                    expected += child_node.subtree_count;
                }
            }
            if expected != node.subtree_count {
                return fail(format!(
                    "subtree count {} but {expected} occupants below",
                    node.subtree_count
                ));
            }
            if id != self.root {
                for entity in &node.entities {
                    let inside = self
                        .bounds
                        .get(entity)
                        .is_some_and(|b| node.bounds.contains_aabb(b));
                    if !inside {
                        return fail(format!("{entity:?} escapes its node"));
                    }
                }
            }
        }
        Ok(())
    }

    fn query_with(&self, test: impl Fn(&Aabb) -> bool, out: &mut Vec<EntityId>) {
        let mut stack: SmallVec<[NodeId; 64]> = smallvec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            let node_hit = test(&node.bounds);
            if node_hit || id == self.root {
                out.extend(
                    node.entities
                        .iter()
                        .copied()
                        .filter(|e| self.bounds.get(e).is_some_and(&test)),
                );
            }
            if node_hit {
                if let Some(children) = node.children {
                    stack.extend(children);
                }
            }
        }
    }

    fn place(&mut self, entity: EntityId, bounds: Aabb) {
        let node_id = self.find_node(&bounds);
        self.nodes[node_id].entities.push(entity);
        self.locations.insert(entity, node_id);
        self.bounds.insert(entity, bounds);

        let mut current = Some(node_id);
        while let Some(id) = current {
            let node = &mut self.nodes[id];
            node.subtree_count += 1;
            current = node.parent;
        }
        self.subdivide_if_crowded(node_id);
    }

    /// Take an entity out of the tree, collapsing sparse ancestors
    fn detach(&mut self, entity: EntityId) -> bool {
        let Some(node_id) = self.locations.remove(&entity) else {
            return false;
        };
        self.bounds.remove(&entity);
        let list = &mut self.nodes[node_id].entities;
        if let Some(pos) = list.iter().position(|e| *e == entity) {
            list.swap_remove(pos);
        }

        let mut current = Some(node_id);
        while let Some(id) = current {
            let node = &mut self.nodes[id];
            node.subtree_count = node.subtree_count.saturating_sub(1);
            current = node.parent;
        }

        let mut current = Some(node_id);
        while let Some(id) = current {
            let node = &self.nodes[id];
            let parent = node.parent;
            if node.children.is_some()
                && node.subtree_count <= self.config.min_entities_to_collapse
            {
                self.collapse(id);
            }
            current = parent;
        }
        true
    }

    fn find_node(&self, bounds: &Aabb) -> NodeId {
        let mut current = self.root;
        if !self.nodes[current].bounds.contains_aabb(bounds) {
            return current;
        }
        loop {
            let node = &self.nodes[current];
            let Some(children) = node.children else {
                return current;
            };
            match node.bounds.octant_containing(bounds) {
                Some(octant) => current = children[octant],
                None => return current,
            }
        }
    }

    fn subdivide_if_crowded(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        if node.children.is_some()
            || node.entities.len() <= self.config.max_entities_per_node
            || node.depth >= self.config.max_depth
            || node.bounds.half_extents().max_element() <= self.config.min_node_size
        {
            return;
        }

        let (bounds, depth) = (node.bounds, node.depth);
        let children: [NodeId; 8] = std::array::from_fn(|octant| {
            self.nodes
                .insert(OctreeNode::new(bounds.octant(octant), depth + 1, Some(id)))
        });
        self.nodes[id].children = Some(children);

        let occupants = std::mem::take(&mut self.nodes[id].entities);
        let mut kept = SmallVec::new();
        for entity in occupants {
            let octant = self
                .bounds
                .get(&entity)
                .and_then(|b| bounds.octant_containing(b));
            match octant {
                Some(octant) => {
                    let child = &mut self.nodes[children[octant]];
                    child.entities.push(entity);
                    child.subtree_count += 1;
                    self.locations.insert(entity, children[octant]);
                }
                None => kept.push(entity),
            }
        }
        self.nodes[id].entities = kept;

        for child in children {
            self.subdivide_if_crowded(child);
        }
    }

    /// Pull every descendant's occupants up into `id`
    fn collapse(&mut self, id: NodeId) {
        let Some(children) = self.nodes[id].children.take() else {
            return;
        };
        let mut stack: SmallVec<[NodeId; 16]> = SmallVec::from_slice(&children);
        let mut gathered: SmallVec<[EntityId; 8]> = SmallVec::new();
        while let Some(child) = stack.pop() {
            if let Some(node) = self.nodes.remove(child) {
                gathered.extend(node.entities);
                if let Some(grandchildren) = node.children {
                    stack.extend(grandchildren);
                }
            }
        }
        for entity in &gathered {
            self.locations.insert(*entity, id);
        }
        self.nodes[id].entities.extend(gathered);
    }

    fn expand_to_fit(&mut self, bounds: &Aabb) {
        let old = self.root_bounds();
        let new_root = old.union(bounds).scaled(self.config.expansion_factor);
        tracing::debug!(
            old_min = ?old.min,
            old_max = ?old.max,
            new_min = ?new_root.min,
            new_max = ?new_root.max,
            "octree root expanded"
        );
        self.rebuild(new_root);
    }

    fn rebuild(&mut self, root_bounds: Aabb) {
        let mut entries: Vec<(EntityId, Aabb)> = self.bounds.drain().collect();
        entries.sort_by_key(|(entity, _)| *entity);
        self.locations.clear();
        self.nodes.clear();
        self.root = self.nodes.insert(OctreeNode::new(root_bounds, 0, None));
        for (entity, bounds) in entries {
            self.place(entity, bounds);
        }
        self.rebuilds += 1;
    }
}

impl std::fmt::Debug for Octree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Octree")
            .field("root_bounds", &self.root_bounds())
            .field("stats", &self.stats())
            .field("batching", &self.is_batching())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;
    use std::collections::HashSet;

    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self) -> f32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 40) as f32 / (1u64 << 24) as f32
        }
    }

    fn ids(count: usize) -> Vec<EntityId> {
        let mut map = SlotMap::<EntityId, ()>::with_key();
        (0..count).map(|_| map.insert(())).collect()
    }

    fn cube(center: Vec3, half: f32) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3::splat(half))
    }

    fn world() -> Aabb {
        Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0))
    }

    fn populate(tree: &mut Octree, count: usize, seed: u64) -> Vec<(EntityId, Aabb)> {
        let mut rng = Lcg(seed);
        ids(count)
            .into_iter()
            .map(|id| {
                let center = Vec3::new(
                    rng.next_f32() * 196.0 - 98.0,
                    rng.next_f32() * 196.0 - 98.0,
                    rng.next_f32() * 196.0 - 98.0,
                );
                let bounds = cube(center, 0.5 + rng.next_f32());
                tree.insert(id, bounds);
                (id, bounds)
            })
            .collect()
    }

    #[test]
    fn test_subdivides_when_crowded() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let entities = ids(9);
        for (i, id) in entities.iter().enumerate() {
            tree.insert(*id, cube(Vec3::splat(50.0 + i as f32), 0.25));
        }
        let stats = tree.stats();
        assert!(stats.node_count > 1);
        assert_eq!(stats.entity_count, 9);
        tree.validate().unwrap();
    }

    #[test]
    fn test_straddling_box_stays_at_root() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let entities = ids(10);
        tree.insert(entities[0], cube(Vec3::ZERO, 1.0));
        for id in &entities[1..] {
            tree.insert(*id, cube(Vec3::splat(60.0), 1.0));
        }
        assert_eq!(tree.locations[&entities[0]], tree.root);
        assert_ne!(tree.locations[&entities[1]], tree.root);
        tree.validate().unwrap();
    }

    #[test]
    fn test_remove_collapses() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let placed = populate(&mut tree, 64, 7);
        assert!(tree.stats().node_count > 1);

        for (id, _) in &placed[..62] {
            assert!(tree.remove(*id));
        }
        assert!(!tree.remove(placed[0].0));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.stats().node_count, 1);
        tree.validate().unwrap();
    }

    #[test]
    fn test_dynamic_expansion() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let entities = ids(2);
        tree.insert(entities[0], cube(Vec3::ZERO, 1.0));
        tree.insert(entities[1], cube(Vec3::splat(300.0), 1.0));

        assert!(tree.root_bounds().contains_aabb(&cube(Vec3::splat(300.0), 1.0)));
        assert_eq!(tree.stats().rebuilds, 1);
        assert_eq!(tree.query_aabb(&cube(Vec3::splat(300.0), 2.0)), vec![entities[1]]);
        tree.validate().unwrap();
    }

    #[test]
    fn test_no_expansion_keeps_outsiders_queryable() {
        let config = OctreeConfig {
            dynamic_expansion: false,
            ..OctreeConfig::default()
        };
        let mut tree = Octree::new(world(), config);
        let entities = ids(1);
        tree.insert(entities[0], cube(Vec3::splat(500.0), 1.0));

        assert_eq!(tree.root_bounds(), world());
        let frustum = Frustum::from_aabb(&cube(Vec3::splat(500.0), 10.0));
        assert_eq!(tree.query_frustum(&frustum), vec![entities[0]]);
        tree.validate().unwrap();
    }

    #[test]
    fn test_queries_match_brute_force() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let placed = populate(&mut tree, 500, 42);
        tree.validate().unwrap();

        let area = Aabb::new(Vec3::new(-50.0, -20.0, -80.0), Vec3::new(10.0, 60.0, 0.0));
        let frustum = Frustum::from_aabb(&area);
        let sphere = Sphere::new(Vec3::new(20.0, 0.0, 20.0), 35.0);

        let expect = |f: &dyn Fn(&Aabb) -> bool| -> HashSet<EntityId> {
            placed.iter().filter(|(_, b)| f(b)).map(|(id, _)| *id).collect()
        };
        let got = |v: Vec<EntityId>| -> HashSet<EntityId> { v.into_iter().collect() };

        assert_eq!(got(tree.query_frustum(&frustum)), expect(&|b| frustum.intersects_aabb(b)));
        assert_eq!(got(tree.query_aabb(&area)), expect(&|b| b.intersects_aabb(&area)));
        assert_eq!(got(tree.query_sphere(&sphere)), expect(&|b| sphere.intersects_aabb(b)));
    }

    #[test]
    fn test_ray_hits_sorted() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let entities = ids(3);
        tree.insert(entities[0], cube(Vec3::new(50.0, 0.0, 0.0), 1.0));
        tree.insert(entities[1], cube(Vec3::new(10.0, 0.0, 0.0), 1.0));
        tree.insert(entities[2], cube(Vec3::new(30.0, 5.0, 0.0), 1.0));

        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let hits = tree.query_ray(&ray, 100.0);
        let order: Vec<_> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![entities[1], entities[0]]);
        assert!((hits[0].1 - 9.0).abs() < 1e-4);

        assert_eq!(tree.query_ray(&ray, 20.0).len(), 1);
    }

    #[test]
    fn test_batch_update_defers_reinsertion() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let entities = ids(2);
        tree.insert(entities[0], cube(Vec3::splat(-50.0), 1.0));
        tree.insert(entities[1], cube(Vec3::splat(-40.0), 1.0));

        tree.begin_batch_update();
        tree.update(entities[0], cube(Vec3::splat(50.0), 1.0));
        assert!(tree.contains(entities[0]));
        assert_eq!(tree.len(), 2);
        assert!(tree.query_aabb(&cube(Vec3::splat(50.0), 5.0)).is_empty());

        assert_eq!(tree.end_batch_update(), 1);
        assert_eq!(tree.query_aabb(&cube(Vec3::splat(50.0), 5.0)), vec![entities[0]]);
        assert!(!tree.is_batching());
        tree.validate().unwrap();
    }

    #[test]
    fn test_update_moves_between_nodes() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        let placed = populate(&mut tree, 200, 3);
        let mut rng = Lcg(99);
        for (id, _) in &placed {
            let center = Vec3::new(
                rng.next_f32() * 190.0 - 95.0,
                rng.next_f32() * 190.0 - 95.0,
                rng.next_f32() * 190.0 - 95.0,
            );
            tree.update(*id, cube(center, 1.0));
        }
        assert_eq!(tree.len(), 200);
        tree.validate().unwrap();
    }

    #[test]
    fn test_clear() {
        let mut tree = Octree::new(world(), OctreeConfig::default());
        populate(&mut tree, 50, 11);
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.stats().node_count, 1);
        assert_eq!(tree.root_bounds(), world());
    }
}
