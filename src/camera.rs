//! Pinhole camera for primary rays.

use serde::{Deserialize, Serialize};

use crate::scene::Ray;
use crate::util::{pixel_seed, pcg_hash, unit_float, Vec3};

/// Look-at pinhole camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical FOV in degrees
    pub fov_y: f32,
    /// Sub-pixel jitter seeded by the frame counter
    pub jitter: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45.0,
            jitter: false,
        }
    }
}

impl Camera {
    pub fn look_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    /// Orbit around `target` (yaw/pitch in degrees).
    pub fn orbit(target: Vec3, distance: f32, yaw: f32, pitch: f32) -> Self {
        let (sy, cy) = yaw.to_radians().sin_cos();
        let (sp, cp) = pitch.to_radians().sin_cos();
        let offset = Vec3::new(sy * cp, sp, cy * cp) * distance;
        Self::look_at(target + offset, target)
    }

    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = (self.target - self.position).normalize_or_zero();
        let mut right = forward.cross(self.up).normalize_or_zero();
        if right == Vec3::ZERO {
            right = forward.any_orthonormal_vector();
        }
        let up = right.cross(forward);
        (forward, right, up)
    }

    /// Primary ray through pixel `(x, y)`; row 0 is the top of the image.
    pub fn primary_ray(&self, x: u32, y: u32, extent: (u32, u32), frame: u64) -> Ray {
        let (w, h) = (extent.0.max(1) as f32, extent.1.max(1) as f32);
        let (jx, jy) = if self.jitter {
            let s = pixel_seed(x, y, frame);
            (unit_float(s), unit_float(pcg_hash(s)))
        } else {
            (0.5, 0.5)
        };

        let ndc_x = ((x as f32 + jx) / w) * 2.0 - 1.0;
        let ndc_y = 1.0 - ((y as f32 + jy) / h) * 2.0;
        let tan_half = (self.fov_y.to_radians() * 0.5).tan();
        let aspect = w / h;

        let (forward, right, up) = self.basis();
        let dir = forward + right * (ndc_x * tan_half * aspect) + up * (ndc_y * tan_half);
        Ray::new(self.position, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_ray_points_at_target() {
        let cam = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        // Odd extent so the centre pixel centre is exactly on axis
        let ray = cam.primary_ray(1, 1, (3, 3), 0);
        assert!((ray.dir - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn test_top_row_points_up() {
        let cam = Camera::default();
        let ray = cam.primary_ray(1, 0, (3, 3), 0);
        assert!(ray.dir.y > 0.0);
    }

    #[test]
    fn test_jitter_is_deterministic_per_frame() {
        let cam = Camera { jitter: true, ..Default::default() };
        let a = cam.primary_ray(4, 4, (8, 8), 1);
        let b = cam.primary_ray(4, 4, (8, 8), 1);
        let c = cam.primary_ray(4, 4, (8, 8), 2);
        assert_eq!(a.dir, b.dir);
        assert_ne!(a.dir, c.dir);
    }

    #[test]
    fn test_orbit_distance() {
        let cam = Camera::orbit(Vec3::ZERO, 4.0, 30.0, 20.0);
        assert!((cam.position.length() - 4.0).abs() < 1e-5);
    }
}
