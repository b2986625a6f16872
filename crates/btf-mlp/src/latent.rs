//! Per-material latent texture.

use crate::{check_scale, MlpError, LATENT_CHANNELS};

/// Square int8 latent grid, `LATENT_CHANNELS` values per texel, tiling in both axes.
#[derive(Debug, Clone)]
pub struct LatentGrid {
    resolution: usize,
    scale: f32,
    data: Vec<i8>,
}

impl LatentGrid {
    pub fn new(resolution: usize, scale: f32, data: Vec<i8>) -> Result<Self, MlpError> {
        if resolution == 0 {
            return Err(MlpError::EmptyLatent);
        }
        check_scale("latent scale", scale)?;
        let expected = resolution * resolution * LATENT_CHANNELS;
        if data.len() != expected {
            return Err(MlpError::LatentSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { resolution, scale, data })
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn data(&self) -> &[i8] {
        &self.data
    }

    #[inline]
    fn texel(&self, x: i64, y: i64) -> &[i8] {
        let r = self.resolution as i64;
        let x = x.rem_euclid(r) as usize;
        let y = y.rem_euclid(r) as usize;
        let start = (y * self.resolution + x) * LATENT_CHANNELS;
        &self.data[start..start + LATENT_CHANNELS]
    }

    /// Bilinear fetch with wrap addressing; texel centers sit at `(i + 0.5) / res`.
    pub fn fetch(&self, u: f32, v: f32) -> [f32; LATENT_CHANNELS] {
        let r = self.resolution as f32;
        let x = u * r - 0.5;
        let y = v * r - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let t00 = self.texel(x0, y0);
        let t10 = self.texel(x0 + 1, y0);
        let t01 = self.texel(x0, y0 + 1);
        let t11 = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0f32; LATENT_CHANNELS];
        for (c, o) in out.iter_mut().enumerate() {
            let top = t00[c] as f32 * (1.0 - fx) + t10[c] as f32 * fx;
            let bottom = t01[c] as f32 * (1.0 - fx) + t11[c] as f32 * fx;
            *o = (top * (1.0 - fy) + bottom * fy) * self.scale;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> LatentGrid {
        // 2x2 grid, channel 0 holds texel index, others zero
        let mut data = vec![0i8; 2 * 2 * LATENT_CHANNELS];
        for t in 0..4 {
            data[t * LATENT_CHANNELS] = (t as i8) * 10;
        }
        LatentGrid::new(2, 0.1, data).unwrap()
    }

    #[test]
    fn test_fetch_texel_center_is_exact() {
        let g = grid();
        assert!((g.fetch(0.25, 0.25)[0] - 0.0).abs() < 1e-6);
        assert!((g.fetch(0.75, 0.25)[0] - 1.0).abs() < 1e-6);
        assert!((g.fetch(0.25, 0.75)[0] - 2.0).abs() < 1e-6);
        assert!((g.fetch(0.75, 0.75)[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fetch_wraps() {
        let g = grid();
        let a = g.fetch(0.25, 0.25);
        let b = g.fetch(1.25, -0.75);
        assert!((a[0] - b[0]).abs() < 1e-5);
    }

    #[test]
    fn test_rejects_wrong_size() {
        let err = LatentGrid::new(2, 1.0, vec![0; 5]).unwrap_err();
        assert_eq!(err, MlpError::LatentSize { expected: 32, actual: 5 });
    }
}
