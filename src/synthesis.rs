//! Texture-synthesis adapter boundary.
//!
//! An optional transform applied by the packer to material UVs before they are
//! projected and quantized, used to break up visible tiling of the neural
//! material. The pipeline treats it as opaque.

use crate::util::{pcg_hash, unit_float, Vec2};

/// UV remap applied to valid shading points before packing.
pub trait TextureSynthesis: Send + Sync {
    fn remap(&self, uv: Vec2) -> Vec2;
}

/// Per-tile random offset and quarter-turn rotation.
///
/// Every integer UV cell gets its own hashed translation and orientation, so
/// neighbouring repeats of the material no longer line up.
#[derive(Debug, Clone, Copy)]
pub struct TileShuffle {
    pub seed: u32,
    pub rotate: bool,
}

impl Default for TileShuffle {
    fn default() -> Self {
        Self { seed: 0x5eed, rotate: true }
    }
}

impl TileShuffle {
    pub fn new(seed: u32) -> Self {
        Self { seed, ..Default::default() }
    }

    fn cell_hash(&self, cx: i32, cy: i32) -> u32 {
        pcg_hash((cx as u32).wrapping_mul(374_761_393) ^ pcg_hash((cy as u32) ^ pcg_hash(self.seed)))
    }
}

impl TextureSynthesis for TileShuffle {
    fn remap(&self, uv: Vec2) -> Vec2 {
        let cell = uv.floor();
        let local = uv - cell;
        let h = self.cell_hash(cell.x as i32, cell.y as i32);

        let local = if self.rotate {
            match h & 3 {
                1 => Vec2::new(1.0 - local.y, local.x),
                2 => Vec2::new(1.0 - local.x, 1.0 - local.y),
                3 => Vec2::new(local.y, 1.0 - local.x),
                _ => local,
            }
        } else {
            local
        };

        let h2 = pcg_hash(h);
        let offset = Vec2::new(unit_float(h2), unit_float(pcg_hash(h2)));
        cell + (local + offset).fract()
    }
}

/// Identity remap.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSynthesis;

impl TextureSynthesis for NoSynthesis {
    fn remap(&self, uv: Vec2) -> Vec2 {
        uv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shuffle_is_deterministic() {
        let s = TileShuffle::new(7);
        let uv = Vec2::new(2.3, -1.6);
        assert_eq!(s.remap(uv), s.remap(uv));
    }

    #[test]
    fn test_shuffle_stays_in_cell() {
        let s = TileShuffle::new(1);
        for i in 0..64 {
            let uv = Vec2::new(i as f32 * 0.37 - 5.0, i as f32 * 0.21 - 3.0);
            let out = s.remap(uv);
            assert_eq!(out.floor(), uv.floor());
        }
    }

    #[test]
    fn test_cells_differ() {
        let s = TileShuffle::new(3);
        let a = s.remap(Vec2::new(0.5, 0.5)).fract();
        let moved: Vec<_> = (1..8).map(|i| s.remap(Vec2::new(i as f32 + 0.5, 0.5)).fract()).collect();
        assert!(moved.iter().any(|m| (*m - a).length() > 1e-3));
    }

    #[test]
    fn test_identity() {
        let uv = Vec2::new(0.1, 0.9);
        assert_eq!(NoSynthesis.remap(uv), uv);
    }
}
