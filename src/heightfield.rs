//! Height-field asset and the traced height-field probe.
//!
//! Each material ships a grey-scale height map. At a hit the tracing stage
//! marches the view ray through the height volume above the surface and the
//! displaced UV is what the network sees.

use std::path::Path;

use crate::util::{Error, Result, Vec2, Vec3};

/// Result of a height-field march.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightProbe {
    /// UV where the view ray meets the height surface
    pub uv: Vec2,
    /// Normalized depth below the top of the volume, in [0, 1]
    pub depth: f32,
    /// Height sampled at `uv`, in [0, 1]
    pub height: f32,
}

/// Single-channel height map in [0, 1], tiling in both axes.
#[derive(Debug, Clone)]
pub struct HeightField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl HeightField {
    /// Decode an image as luminance.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::AssetNotFound(path.to_path_buf()));
        }
        let img = image::ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| Error::malformed(path, format!("height field: {e}")))?;
        let luma = img.to_luma32f();
        let (width, height) = luma.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::malformed(path, "height field has zero extent"));
        }
        tracing::debug!(path = %path.display(), width, height, "height field loaded");
        Ok(Self {
            width,
            height,
            data: luma.into_raw().into_iter().map(|h| h.clamp(0.0, 1.0)).collect(),
        })
    }

    /// Build from a function of texel-centre UV.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(Vec2) -> f32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let uv = Vec2::new((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32);
                data.push(f(uv).clamp(0.0, 1.0));
            }
        }
        Self { width, height, data }
    }

    /// Constant-height field; marching returns the input UV unchanged.
    pub fn flat(level: f32) -> Self {
        Self::from_fn(1, 1, |_| level)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Write as 8-bit grey PNG/JPEG (format from extension).
    pub fn save(&self, path: &Path) -> Result<()> {
        let img = image::GrayImage::from_fn(self.width, self.height, |x, y| {
            let h = self.data[(y * self.width + x) as usize];
            image::Luma([(h * 255.0).round() as u8])
        });
        img.save(path)?;
        Ok(())
    }

    #[inline]
    fn texel(&self, x: i64, y: i64) -> f32 {
        let x = x.rem_euclid(self.width as i64) as u32;
        let y = y.rem_euclid(self.height as i64) as u32;
        self.data[(y * self.width + x) as usize]
    }

    /// Bilinear sample with wrap addressing.
    pub fn sample(&self, uv: Vec2) -> f32 {
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);
        let top = self.texel(x0, y0) * (1.0 - fx) + self.texel(x0 + 1, y0) * fx;
        let bottom = self.texel(x0, y0 + 1) * (1.0 - fx) + self.texel(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Parallax march from `uv` along the local view direction `wo` (z up).
    ///
    /// `scale` is the UV offset at full depth for a 45° view, `steps` the
    /// number of linear layers. Grazing or back-facing views do not displace.
    pub fn march(&self, uv: Vec2, wo: Vec3, scale: f32, steps: u32) -> HeightProbe {
        let steps = steps.max(1);
        if wo.z <= 1e-3 || scale <= 0.0 {
            return HeightProbe { uv, depth: 1.0 - self.sample(uv), height: self.sample(uv) };
        }

        let layer = 1.0 / steps as f32;
        let delta = -Vec2::new(wo.x, wo.y) / wo.z * scale * layer;
        let mut cur_uv = uv;
        let mut cur_depth = 0.0f32;
        let mut surface = 1.0 - self.sample(cur_uv);
        let mut prev = (cur_uv, cur_depth, surface);

        for _ in 0..steps {
            if cur_depth >= surface {
                break;
            }
            prev = (cur_uv, cur_depth, surface);
            cur_uv += delta;
            cur_depth += layer;
            surface = 1.0 - self.sample(cur_uv);
        }

        // Linear refinement between the last two layers
        let after = surface - cur_depth;
        let before = prev.2 - prev.1;
        let denom = before - after;
        let t = if denom.abs() > 1e-6 { (before / denom).clamp(0.0, 1.0) } else { 1.0 };
        let hit_uv = prev.0.lerp(cur_uv, t);
        let depth = (prev.1 + (cur_depth - prev.1) * t).clamp(0.0, 1.0);

        HeightProbe { uv: hit_uv, depth, height: self.sample(hit_uv) }
    }
}
