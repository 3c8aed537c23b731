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

//! Bounding volumes used for culling: boxes, spheres, rays, planes and frustums.
//!
//! Vectors, quaternions and matrices come from `glam`.

pub use glam::{Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        let half = half_extents.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Smallest box around `points`; `None` when empty
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// `other` lies entirely inside this box (touching faces count as inside)
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    pub fn intersects_aabb(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Same center, extents multiplied by `factor`
    pub fn scaled(&self, factor: f32) -> Aabb {
        Aabb::from_center_half_extents(self.center(), self.half_extents() * factor)
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// World-space box around this box transformed by `matrix`
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        let corners = self.corners().map(|c| matrix.transform_point3(c));
        // corners is never empty
        Aabb::from_points(&corners).unwrap_or(*self)
    }

    /// Octant `index` (bit 0 = +x, bit 1 = +y, bit 2 = +z)
    pub fn octant(&self, index: usize) -> Aabb {
        let center = self.center();
        let min = Vec3::new(
            if index & 1 != 0 { center.x } else { self.min.x },
            if index & 2 != 0 { center.y } else { self.min.y },
            if index & 4 != 0 { center.z } else { self.min.z },
        );
        let max = Vec3::new(
            if index & 1 != 0 { self.max.x } else { center.x },
            if index & 2 != 0 { self.max.y } else { center.y },
            if index & 4 != 0 { self.max.z } else { center.z },
        );
        Aabb { min, max }
    }

    /// Octant that fully contains `other`, if a single one does
    pub fn octant_containing(&self, other: &Aabb) -> Option<usize> {
        let center = self.center();
        let mut index = 0;
        for axis in 0..3 {
            if other.min[axis] >= center[axis] {
                index |= 1 << axis;
            } else if other.max[axis] > center[axis] {
                return None;
            }
        }
        self.octant(index).contains_aabb(other).then_some(index)
    }

    pub fn distance_squared_to_point(&self, point: Vec3) -> f32 {
        let clamped = point.clamp(self.min, self.max);
        clamped.distance_squared(point)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius: radius.abs(),
        }
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.distance_squared_to_point(self.center) <= self.radius * self.radius
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit length
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Entry distance along the ray (slab test); `0.0` when the origin is inside
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let origin = self.origin[axis];
            let dir = self.direction[axis];
            if dir.abs() < f32::EPSILON {
                if origin < aabb.min[axis] || origin > aabb.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut t0 = (aabb.min[axis] - origin) * inv;
            let mut t1 = (aabb.max[axis] - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

/// Plane `normal · p + d = 0`; the positive half-space is "inside"
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Plane through `point` facing `normal`
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(point),
        }
    }

    fn from_vec4(v: Vec4) -> Self {
        let normal = v.truncate();
        let len = normal.length();
        if len > f32::EPSILON {
            Self {
                normal: normal / len,
                d: v.w / len,
            }
        } else {
            Self { normal, d: v.w }
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// Result of classifying a volume against a frustum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Intersect,
    Inside,
}

/// Six inward-facing planes: left, right, bottom, top, near, far
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract planes from a view-projection matrix with `[0, 1]` clip depth
    /// (the convention of `Mat4::perspective_rh` / `Mat4::orthographic_rh`).
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        let r0 = view_projection.row(0);
        let r1 = view_projection.row(1);
        let r2 = view_projection.row(2);
        let r3 = view_projection.row(3);
        Self {
            planes: [
                Plane::from_vec4(r3 + r0),
                Plane::from_vec4(r3 - r0),
                Plane::from_vec4(r3 + r1),
                Plane::from_vec4(r3 - r1),
                Plane::from_vec4(r2),
                Plane::from_vec4(r3 - r2),
            ],
        }
    }

    /// Box-shaped frustum covering exactly `bounds`
    pub fn from_aabb(bounds: &Aabb) -> Self {
        Self {
            planes: [
                Plane::from_point_normal(bounds.min, Vec3::X),
                Plane::from_point_normal(bounds.max, Vec3::NEG_X),
                Plane::from_point_normal(bounds.min, Vec3::Y),
                Plane::from_point_normal(bounds.max, Vec3::NEG_Y),
                Plane::from_point_normal(bounds.min, Vec3::Z),
                Plane::from_point_normal(bounds.max, Vec3::NEG_Z),
            ],
        }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.signed_distance(point) >= 0.0)
    }

    pub fn classify_aabb(&self, aabb: &Aabb) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let positive = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            if plane.signed_distance(positive) < 0.0 {
                return Containment::Outside;
            }
            let negative = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.min, aabb.max);
            if plane.signed_distance(negative) < 0.0 {
                result = Containment::Intersect;
            }
        }
        result
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.classify_aabb(aabb) != Containment::Outside
    }

    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes
            .iter()
            .all(|p| p.signed_distance(sphere.center) >= -sphere.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0))
    }

    #[test]
    fn test_octant_containment() {
        let root = Aabb::new(Vec3::ZERO, Vec3::splat(8.0));
        let inside = Aabb::new(Vec3::splat(5.0), Vec3::splat(6.0));
        assert_eq!(root.octant_containing(&inside), Some(7));

        let straddling = Aabb::new(Vec3::splat(3.0), Vec3::splat(5.0));
        assert_eq!(root.octant_containing(&straddling), None);

        let low = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.0));
        assert_eq!(root.octant_containing(&low), Some(0));
        assert!(root.octant(0).contains_aabb(&low));
    }

    #[test]
    fn test_transformed_box() {
        let moved = unit_box().transformed(&Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        assert!((moved.center() - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);
        assert!((moved.half_extents() - Vec3::ONE).length() < 1e-5);
    }

    #[test]
    fn test_ray_hits_box() {
        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X);
        let t = ray.intersect_aabb(&unit_box()).unwrap();
        assert!((t - 4.0).abs() < 1e-5);

        let miss = Ray::new(Vec3::new(-5.0, 3.0, 0.0), Vec3::X);
        assert!(miss.intersect_aabb(&unit_box()).is_none());

        let behind = Ray::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X);
        assert!(behind.intersect_aabb(&unit_box()).is_none());
    }

    #[test]
    fn test_frustum_classification() {
        let frustum = Frustum::from_aabb(&Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0)));
        assert_eq!(frustum.classify_aabb(&unit_box()), Containment::Inside);

        let straddling = Aabb::new(Vec3::splat(9.0), Vec3::splat(11.0));
        assert_eq!(frustum.classify_aabb(&straddling), Containment::Intersect);

        let outside = Aabb::new(Vec3::splat(20.0), Vec3::splat(21.0));
        assert_eq!(frustum.classify_aabb(&outside), Containment::Outside);
    }

    #[test]
    fn test_perspective_frustum() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&(projection * view));

        assert!(frustum.contains_point(Vec3::ZERO));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 20.0)));
        assert!(frustum.intersects_sphere(&Sphere::new(Vec3::ZERO, 1.0)));
        assert!(!frustum.intersects_aabb(&Aabb::new(
            Vec3::new(500.0, 0.0, 0.0),
            Vec3::new(501.0, 1.0, 1.0)
        )));
    }

    #[test]
    fn test_sphere_box() {
        let sphere = Sphere::new(Vec3::new(3.0, 0.0, 0.0), 2.5);
        assert!(sphere.intersects_aabb(&unit_box()));
        let far = Sphere::new(Vec3::new(5.0, 0.0, 0.0), 1.0);
        assert!(!far.intersects_aabb(&unit_box()));
    }
}
