//! Environment lighting boundary.
//!
//! Lighting is an external collaborator: the pipeline only asks for the
//! background radiance along a direction and for the single dominant light used
//! for direct shading. Importance sampling is out of scope.

use std::path::Path;
use std::sync::Arc;

use crate::util::{euler_degrees, Quat, Result, Vec3};

/// Single directional light derived from the environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Unit direction from the surface toward the light
    pub direction: Vec3,
    pub radiance: Vec3,
}

/// What the pipeline needs from an environment.
pub trait Environment: Send + Sync {
    /// Background radiance seen along `dir` (unrotated environment space).
    fn radiance(&self, dir: Vec3) -> Vec3;

    /// Dominant light (unrotated environment space).
    fn light(&self) -> DirectionalLight;
}

/// Constant background with one directional light.
#[derive(Debug, Clone, Copy)]
pub struct UniformEnvironment {
    pub background: Vec3,
    pub light: DirectionalLight,
}

impl UniformEnvironment {
    pub fn new(background: Vec3, light_dir: Vec3, light_radiance: Vec3) -> Self {
        Self {
            background,
            light: DirectionalLight {
                direction: light_dir.normalize(),
                radiance: light_radiance,
            },
        }
    }
}

impl Default for UniformEnvironment {
    fn default() -> Self {
        Self::new(Vec3::splat(0.05), Vec3::new(0.3, 0.5, 1.0), Vec3::ONE)
    }
}

impl Environment for UniformEnvironment {
    fn radiance(&self, _dir: Vec3) -> Vec3 {
        self.background
    }

    fn light(&self) -> DirectionalLight {
        self.light
    }
}

/// Equirectangular HDR/EXR environment map.
pub struct EquirectEnvironment {
    width: u32,
    height: u32,
    texels: Vec<Vec3>,
    light: DirectionalLight,
}

impl EquirectEnvironment {
    /// Load HDR/EXR (or any format the image crate decodes).
    pub fn load(path: &Path) -> Result<Self> {
        use image::ImageReader;

        let img = ImageReader::open(path)?.decode()?;
        let rgb = img.to_rgb32f();
        let (width, height) = rgb.dimensions();
        let texels = rgb.pixels().map(|p| Vec3::new(p[0], p[1], p[2])).collect();
        let env = Self::from_texels(width, height, texels);
        tracing::info!(path = %path.display(), width, height, "environment map loaded");
        Ok(env)
    }

    /// Build from raw linear RGB texels, row-major, top row = +Y pole.
    pub fn from_texels(width: u32, height: u32, texels: Vec<Vec3>) -> Self {
        let light = dominant_light(width, height, &texels);
        Self {
            width,
            height,
            texels,
            light,
        }
    }

    fn texel_dir(&self, x: u32, y: u32) -> Vec3 {
        texel_direction(self.width, self.height, x, y)
    }
}

fn texel_direction(width: u32, height: u32, x: u32, y: u32) -> Vec3 {
    let u = (x as f32 + 0.5) / width as f32;
    let v = (y as f32 + 0.5) / height as f32;
    let phi = u * std::f32::consts::TAU - std::f32::consts::PI;
    let theta = v * std::f32::consts::PI;
    Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin())
}

/// Brightest texel direction, weighted by luminance × solid angle.
fn dominant_light(width: u32, height: u32, texels: &[Vec3]) -> DirectionalLight {
    let mut best = (0.0f32, 0usize);
    for (i, t) in texels.iter().enumerate() {
        let y = (i as u32) / width.max(1);
        let theta = std::f32::consts::PI * (y as f32 + 0.5) / height.max(1) as f32;
        let lum = (0.2126 * t.x + 0.7152 * t.y + 0.0722 * t.z) * theta.sin();
        if lum > best.0 {
            best = (lum, i);
        }
    }
    if texels.is_empty() || best.0 <= 0.0 {
        return DirectionalLight {
            direction: Vec3::Y,
            radiance: Vec3::ZERO,
        };
    }
    let (x, y) = (best.1 as u32 % width, best.1 as u32 / width);
    DirectionalLight {
        direction: texel_direction(width, height, x, y),
        radiance: texels[best.1],
    }
}

impl Environment for EquirectEnvironment {
    fn radiance(&self, dir: Vec3) -> Vec3 {
        if self.texels.is_empty() {
            return Vec3::ZERO;
        }
        let d = dir.normalize_or_zero();
        let phi = d.z.atan2(d.x);
        let theta = d.y.clamp(-1.0, 1.0).acos();
        let u = (phi + std::f32::consts::PI) / std::f32::consts::TAU;
        let v = theta / std::f32::consts::PI;
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        self.texels[(y * self.width + x) as usize]
    }

    fn light(&self) -> DirectionalLight {
        self.light
    }
}

impl EquirectEnvironment {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Direction at the centre of texel `(x, y)`.
    pub fn direction_of(&self, x: u32, y: u32) -> Vec3 {
        self.texel_dir(x, y)
    }
}

/// Environment seen through the user-controlled rotation.
#[derive(Clone)]
pub struct EnvironmentView {
    env: Arc<dyn Environment>,
    rotation: Quat,
}

impl EnvironmentView {
    /// `angles` are Euler degrees (x, y, z).
    pub fn new(env: Arc<dyn Environment>, angles: Vec3) -> Self {
        Self {
            env,
            rotation: euler_degrees(angles),
        }
    }

    pub fn radiance(&self, world_dir: Vec3) -> Vec3 {
        self.env.radiance(self.rotation.inverse() * world_dir)
    }

    pub fn light(&self) -> DirectionalLight {
        let l = self.env.light();
        DirectionalLight {
            direction: (self.rotation * l.direction).normalize_or_zero(),
            radiance: l.radiance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_environment() {
        let env = UniformEnvironment::new(Vec3::splat(0.2), Vec3::new(0.0, 0.0, 2.0), Vec3::ONE);
        assert_eq!(env.radiance(Vec3::X), Vec3::splat(0.2));
        assert!((env.light().direction - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_equirect_dominant_light() {
        let (w, h) = (8, 4);
        let mut texels = vec![Vec3::splat(0.1); (w * h) as usize];
        texels[(1 * w + 3) as usize] = Vec3::splat(50.0);
        let env = EquirectEnvironment::from_texels(w, h, texels);
        let light = env.light();
        assert_eq!(light.radiance, Vec3::splat(50.0));
        assert!((light.direction - env.direction_of(3, 1)).length() < 1e-5);
        // Lookup along the light direction returns the bright texel
        assert_eq!(env.radiance(light.direction), Vec3::splat(50.0));
    }

    #[test]
    fn test_view_rotation() {
        let env: Arc<dyn Environment> = Arc::new(UniformEnvironment::new(Vec3::ZERO, Vec3::X, Vec3::ONE));
        let view = EnvironmentView::new(env, Vec3::new(0.0, 90.0, 0.0));
        let d = view.light().direction;
        // +X rotated 90° about Y lands on -Z
        assert!((d - Vec3::NEG_Z).length() < 1e-5);
    }
}
