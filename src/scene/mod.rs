//! Scene boundary.
//!
//! The pipeline treats the scene as opaque beyond ray intersection: anything
//! implementing [`SceneIntersector`] can be traced. [`TriangleScene`] is the
//! in-crate implementation, a triangle soup behind a SAH BVH.
//!
//! ## Architecture
//! ```text
//! Triangles → primitive bounds → BVH build (SAH) → flat nodes → stack traversal
//! ```

pub mod build;
pub mod bvh;

pub use build::{build_bvh, Bvh};
pub use bvh::{Aabb, BvhNode, Triangle};

use crate::util::{Vec2, Vec3};

/// Ray with a minimum hit distance to avoid self-intersection.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
    pub t_min: f32,
}

impl Ray {
    pub const DEFAULT_T_MIN: f32 = 1e-4;

    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self {
            origin,
            dir: dir.normalize(),
            t_min: Self::DEFAULT_T_MIN,
        }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

/// Nearest intersection with interpolated shading attributes.
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub t: f32,
    pub position: Vec3,
    /// Interpolated shading normal, flipped to face the ray origin.
    pub normal: Vec3,
    pub tangent: Vec3,
    pub uv: Vec2,
    pub material_id: u32,
}

/// What the tracing stage needs from a scene.
pub trait SceneIntersector: Send + Sync {
    /// Nearest hit along the ray, if any.
    fn intersect(&self, ray: &Ray) -> Option<Hit>;

    /// Whether anything blocks the ray before `t_max`.
    fn occluded(&self, ray: &Ray, t_max: f32) -> bool;

    /// Scene has no geometry at all.
    fn is_empty(&self) -> bool;
}

/// Triangle scene with a SAH BVH.
pub struct TriangleScene {
    triangles: Vec<Triangle>,
    nodes: Vec<BvhNode>,
}

/// Maximum traversal stack depth.
const STACK_SIZE: usize = 64;

impl TriangleScene {
    /// Build the acceleration structure. Triangles are stored in leaf order.
    pub fn new(triangles: Vec<Triangle>) -> Self {
        let bounds: Vec<Aabb> = triangles.iter().map(Triangle::aabb).collect();
        let bvh = build_bvh(&bounds);
        let ordered = bvh.prim_indices.iter().map(|&i| triangles[i]).collect();
        Self {
            triangles: ordered,
            nodes: bvh.nodes,
        }
    }

    /// Scene with no geometry; every ray misses.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Axis-aligned quad centred at `center`, spanning `size` along `right` and `up`.
    ///
    /// UVs run from 0 to `uv_scale` so the material tiles across the quad.
    pub fn quad(center: Vec3, right: Vec3, up: Vec3, size: f32, uv_scale: f32, material_id: u32) -> [Triangle; 2] {
        let r = right.normalize() * size * 0.5;
        let u = up.normalize() * size * 0.5;
        let p = [center - r - u, center + r - u, center + r + u, center - r + u];
        let t = [
            Vec2::new(0.0, 0.0),
            Vec2::new(uv_scale, 0.0),
            Vec2::new(uv_scale, uv_scale),
            Vec2::new(0.0, uv_scale),
        ];
        [
            Triangle::flat([p[0], p[1], p[2]], [t[0], t[1], t[2]], material_id),
            Triangle::flat([p[0], p[2], p[3]], [t[0], t[2], t[3]], material_id),
        ]
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes[0].bounds()
    }

    /// Stack traversal. `any_hit` stops at the first intersection found.
    fn traverse(&self, ray: &Ray, mut t_max: f32, any_hit: bool) -> Option<(usize, bvh::TriangleHit)> {
        if self.triangles.is_empty() {
            return None;
        }
        let inv_dir = ray.dir.recip();
        let mut best = None;
        let mut stack = [0usize; STACK_SIZE];
        let mut sp = 1;

        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp]];
            if node.bounds().hit(ray.origin, inv_dir, ray.t_min, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for i in first..first + node.count as usize {
                    if let Some(h) = self.triangles[i].intersect(ray, t_max) {
                        t_max = h.t;
                        best = Some((i, h));
                        if any_hit {
                            return best;
                        }
                    }
                }
            } else if sp + 2 <= STACK_SIZE {
                let left = node.left_or_first as usize;
                stack[sp] = left + 1;
                stack[sp + 1] = left;
                sp += 2;
            } else {
                tracing::warn!("bvh traversal stack overflow, subtree skipped");
            }
        }
        best
    }
}

impl SceneIntersector for TriangleScene {
    fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let (i, h) = self.traverse(ray, f32::INFINITY, false)?;
        let tri = &self.triangles[i];
        let b0 = 1.0 - h.b1 - h.b2;

        let mut normal = (tri.n[0] * b0 + tri.n[1] * h.b1 + tri.n[2] * h.b2).normalize_or_zero();
        if normal == Vec3::ZERO {
            normal = tri.geometric_normal();
        }
        if normal.dot(ray.dir) > 0.0 {
            normal = -normal;
        }

        Some(Hit {
            t: h.t,
            position: ray.at(h.t),
            normal,
            tangent: tri.tangent(),
            uv: tri.uv[0] * b0 + tri.uv[1] * h.b1 + tri.uv[2] * h.b2,
            material_id: tri.material_id,
        })
    }

    fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        self.traverse(ray, t_max, true).is_some()
    }

    fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facing_quad() -> TriangleScene {
        TriangleScene::new(TriangleScene::quad(Vec3::ZERO, Vec3::X, Vec3::Y, 2.0, 1.0, 0).to_vec())
    }

    #[test]
    fn test_empty_scene_misses() {
        let scene = TriangleScene::empty();
        assert!(scene.is_empty());
        assert!(scene.intersect(&Ray::new(Vec3::Z, Vec3::NEG_Z)).is_none());
    }

    #[test]
    fn test_quad_hit_attributes() {
        let scene = facing_quad();
        let hit = scene.intersect(&Ray::new(Vec3::new(0.5, 0.0, 3.0), Vec3::NEG_Z)).unwrap();
        assert!((hit.t - 3.0).abs() < 1e-5);
        assert!((hit.normal - Vec3::Z).length() < 1e-5);
        assert!((hit.uv - Vec2::new(0.75, 0.5)).length() < 1e-5);
        assert!((hit.tangent - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_normal_faces_ray() {
        let scene = facing_quad();
        let hit = scene.intersect(&Ray::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z)).unwrap();
        assert!((hit.normal - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn test_occlusion_respects_t_max() {
        let scene = facing_quad();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z);
        assert!(scene.occluded(&ray, 10.0));
        assert!(!scene.occluded(&ray, 2.0));
    }

    #[test]
    fn test_many_triangles_nearest_hit() {
        let mut tris = Vec::new();
        for i in 0..50 {
            let z = -(i as f32);
            tris.extend(TriangleScene::quad(Vec3::new(0.0, 0.0, z), Vec3::X, Vec3::Y, 2.0, 1.0, i));
        }
        let scene = TriangleScene::new(tris);
        let hit = scene.intersect(&Ray::new(Vec3::new(0.1, 0.1, 5.0), Vec3::NEG_Z)).unwrap();
        assert_eq!(hit.material_id, 0);
        assert!((hit.t - 5.0).abs() < 1e-4);
    }
}
