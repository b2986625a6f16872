//! BVH node and primitive types.
//!
//! Flat array layout, the same one a GPU traversal kernel would consume:
//! - 32-byte nodes
//! - triangles carry everything a shading point needs (normals, UVs, tangent)

use bytemuck::{Pod, Zeroable};

use super::Ray;
use crate::util::{Vec2, Vec3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Surface area (for SAH cost). Zero for an empty box.
    #[inline]
    pub fn area(&self) -> f32 {
        let d = (self.max - self.min).max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test. Returns the entry distance if the ray overlaps `[t_min, t_max]`.
    #[inline]
    pub fn hit(&self, origin: Vec3, inv_dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(t_min);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

/// Flat BVH node (32 bytes).
///
/// Internal node: left_or_first = left child index, count = 0
/// Leaf node: left_or_first = first primitive index, count > 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub(crate) fn leaf(bounds: &Aabb, first: usize, count: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: first as u32,
            aabb_max: bounds.max.to_array(),
            count: count as u32,
        }
    }

    pub(crate) fn interior(bounds: &Aabb, left: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: left as u32,
            aabb_max: bounds.max.to_array(),
            count: 0,
        }
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: Vec3::from_array(self.aabb_min),
            max: Vec3::from_array(self.aabb_max),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Triangle with per-vertex shading attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub v: [Vec3; 3],
    pub n: [Vec3; 3],
    pub uv: [Vec2; 3],
    pub material_id: u32,
}

/// Barycentric hit on a single triangle.
#[derive(Debug, Clone, Copy)]
pub struct TriangleHit {
    pub t: f32,
    pub b1: f32,
    pub b2: f32,
}

impl Triangle {
    /// Flat triangle: every vertex uses the geometric normal.
    pub fn flat(v: [Vec3; 3], uv: [Vec2; 3], material_id: u32) -> Self {
        let n = (v[1] - v[0]).cross(v[2] - v[0]).normalize_or_zero();
        Self { v, n: [n; 3], uv, material_id }
    }

    pub fn aabb(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        for p in self.v {
            b.grow_point(p);
        }
        b
    }

    pub fn centroid(&self) -> Vec3 {
        (self.v[0] + self.v[1] + self.v[2]) / 3.0
    }

    pub fn geometric_normal(&self) -> Vec3 {
        (self.v[1] - self.v[0]).cross(self.v[2] - self.v[0]).normalize_or_zero()
    }

    /// dP/du from the UV parametrization, or an edge if UVs are degenerate.
    pub fn tangent(&self) -> Vec3 {
        let e1 = self.v[1] - self.v[0];
        let e2 = self.v[2] - self.v[0];
        let d1 = self.uv[1] - self.uv[0];
        let d2 = self.uv[2] - self.uv[0];
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            return e1.normalize_or_zero();
        }
        ((e1 * d2.y - e2 * d1.y) / det).normalize_or_zero()
    }

    /// Möller–Trumbore intersection, two-sided.
    #[inline]
    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<TriangleHit> {
        let e1 = self.v[1] - self.v[0];
        let e2 = self.v[2] - self.v[0];
        let p = ray.dir.cross(e2);
        let det = e1.dot(p);
        if det.abs() < 1e-10 {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - self.v[0];
        let b1 = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&b1) {
            return None;
        }
        let q = s.cross(e1);
        let b2 = ray.dir.dot(q) * inv_det;
        if b2 < 0.0 || b1 + b2 > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t > ray.t_min && t < t_max).then_some(TriangleHit { t, b1, b2 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_is_32_bytes() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 32);
    }

    #[test]
    fn test_aabb_hit() {
        let b = Aabb {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        let origin = Vec3::new(0.0, 0.0, -5.0);
        let inv = Vec3::new(0.0, 0.0, 1.0).recip();
        let t = b.hit(origin, inv, 0.0, f32::INFINITY).unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        assert!(b.hit(origin, inv, 0.0, 3.0).is_none());
    }

    #[test]
    fn test_triangle_intersect_and_tangent() {
        let tri = Triangle::flat(
            [Vec3::ZERO, Vec3::X, Vec3::Y],
            [Vec2::ZERO, Vec2::X, Vec2::Y],
            0,
        );
        let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z);
        let hit = tri.intersect(&ray, f32::INFINITY).unwrap();
        assert!((hit.t - 1.0).abs() < 1e-6);
        assert!((tri.tangent() - Vec3::X).length() < 1e-6);

        let miss = Ray::new(Vec3::new(0.9, 0.9, 1.0), Vec3::NEG_Z);
        assert!(tri.intersect(&miss, f32::INFINITY).is_none());
    }
}
