//! Math type re-exports and shading-space helpers.
//!
//! Re-exports the `glam` types used throughout the crate and provides the
//! small amount of math the GPU side would normally carry in shader headers:
//! integer hashing for per-pixel sampling and orthonormal shading frames.

pub use glam::{Mat3, Quat, UVec2, Vec2, Vec3, Vec4};

/// PCG hash (O'Neill), one round. Stateless per-pixel random source.
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28).wrapping_add(4))) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Seed for pixel `(x, y)` in frame `frame`.
#[inline]
pub fn pixel_seed(x: u32, y: u32, frame: u64) -> u32 {
    pcg_hash(x ^ pcg_hash(y ^ pcg_hash(frame as u32 ^ (frame >> 32) as u32)))
}

/// Uniform float in [0, 1) from a hash value.
#[inline]
pub fn unit_float(h: u32) -> f32 {
    (h >> 8) as f32 * (1.0 / (1u32 << 24) as f32)
}

/// Orthonormal shading frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub normal: Vec3,
}

impl Frame {
    /// Build a frame from a normal and an approximate tangent.
    ///
    /// The tangent is Gram-Schmidt orthogonalized against the normal; a
    /// degenerate tangent falls back to an arbitrary perpendicular.
    pub fn new(normal: Vec3, tangent: Vec3) -> Self {
        let n = normal.normalize_or_zero();
        let mut t = (tangent - n * n.dot(tangent)).normalize_or_zero();
        if t == Vec3::ZERO {
            t = n.any_orthonormal_vector();
        }
        let b = n.cross(t);
        Self {
            tangent: t,
            bitangent: b,
            normal: n,
        }
    }

    /// World → local (tangent, bitangent, normal).
    #[inline]
    pub fn to_local(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.tangent), v.dot(self.bitangent), v.dot(self.normal))
    }

    /// Local → world.
    #[inline]
    pub fn to_world(&self, v: Vec3) -> Vec3 {
        self.tangent * v.x + self.bitangent * v.y + self.normal * v.z
    }
}

/// Rotation from Euler angles in degrees (applied X, then Y, then Z).
pub fn euler_degrees(angles: Vec3) -> Quat {
    Quat::from_euler(
        glam::EulerRot::ZYX,
        angles.z.to_radians(),
        angles.y.to_radians(),
        angles.x.to_radians(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_float_range() {
        for i in 0..1000u32 {
            let f = unit_float(pcg_hash(i));
            assert!((0.0..1.0).contains(&f));
        }
    }

    #[test]
    fn test_pixel_seed_varies_with_frame() {
        assert_ne!(pixel_seed(3, 4, 0), pixel_seed(3, 4, 1));
        assert_eq!(pixel_seed(3, 4, 7), pixel_seed(3, 4, 7));
    }

    #[test]
    fn test_frame_roundtrip() {
        let f = Frame::new(Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.2, 0.3));
        let v = Vec3::new(0.3, -0.5, 0.8);
        let back = f.to_world(f.to_local(v));
        assert!((back - v).length() < 1e-5);
        assert!(f.tangent.dot(f.normal).abs() < 1e-6);
    }

    #[test]
    fn test_frame_degenerate_tangent() {
        let n = Vec3::Y;
        let f = Frame::new(n, n);
        assert!(f.tangent.is_normalized());
        assert!(f.tangent.dot(n).abs() < 1e-6);
    }
}
