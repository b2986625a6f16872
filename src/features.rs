//! Per-pixel buffer element types and feature projection.
//!
//! Layouts are `repr(C)` + `Pod` so the buffers can be viewed as raw bytes,
//! the same way a device upload would see them.

use bytemuck::{Pod, Zeroable};
use half::f16;

use crate::quantize::CHANNELS;
use crate::synthesis::TextureSynthesis;
use crate::util::{Vec2, Vec3};

/// Shading point written by the tracing stage (96 bytes).
///
/// Directions are in the local shading frame (z = normal). A miss leaves every
/// field zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Default)]
pub struct ShadingFeatureRecord {
    pub position: [f32; 3],
    pub valid: u32,
    pub normal: [f32; 3],
    /// 1 when the light is unoccluded (or shadows are off), 0 otherwise
    pub light_visibility: f32,
    pub tangent: [f32; 3],
    pub hf_depth: f32,
    /// Surface UV at the hit
    pub uv: [f32; 2],
    /// UV displaced by the height-field march
    pub hf_uv: [f32; 2],
    /// Toward the light
    pub wi: [f32; 3],
    pub hf_height: f32,
    /// Toward the camera
    pub wo: [f32; 3],
    pub _pad: u32,
}

impl ShadingFeatureRecord {
    pub const INVALID: Self = Self {
        position: [0.0; 3],
        valid: 0,
        normal: [0.0; 3],
        light_visibility: 0.0,
        tangent: [0.0; 3],
        hf_depth: 0.0,
        uv: [0.0; 2],
        hf_uv: [0.0; 2],
        wi: [0.0; 3],
        hf_height: 0.0,
        wo: [0.0; 3],
        _pad: 0,
    };

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }

    pub fn wi(&self) -> Vec3 {
        Vec3::from_array(self.wi)
    }

    pub fn wo(&self) -> Vec3 {
        Vec3::from_array(self.wo)
    }
}

/// Quantized network input for one pixel.
pub type PackedFeature = [i8; CHANNELS];

/// Network output for one pixel: RGB reflectance plus a coverage flag in alpha.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Default)]
pub struct OutputTexel(pub [f16; 4]);

impl OutputTexel {
    pub const ZERO: Self = Self([f16::ZERO; 4]);

    pub fn from_rgb(rgb: [f32; 3]) -> Self {
        Self([
            f16::from_f32(rgb[0]),
            f16::from_f32(rgb[1]),
            f16::from_f32(rgb[2]),
            f16::ONE,
        ])
    }

    pub fn rgb(&self) -> Vec3 {
        Vec3::new(self.0[0].to_f32(), self.0[1].to_f32(), self.0[2].to_f32())
    }
}

/// Map a valid record to the network's feature convention, all in [-1, 1]:
///
/// | Channels | Group | Value |
/// |---|---|---|
/// | 0-1 | uv | `2·fract(uv) − 1` of the (optionally remapped) displaced UV |
/// | 2-3 | wi | local light direction xy |
/// | 4-5 | wo | local view direction xy |
/// | 6-7 | aux | height-field depth and height, mapped to [-1, 1] |
///
/// Packing spreads each channel over its quantization domain; see
/// [`ScaleBuffer::pack_unit`](crate::quantize::ScaleBuffer::pack_unit).
pub fn project_features(record: &ShadingFeatureRecord, synthesis: Option<&dyn TextureSynthesis>) -> [f32; CHANNELS] {
    let mut uv = Vec2::from_array(record.hf_uv);
    if let Some(s) = synthesis {
        uv = s.remap(uv);
    }
    let uv = uv - uv.floor();
    [
        2.0 * uv.x - 1.0,
        2.0 * uv.y - 1.0,
        record.wi[0],
        record.wi[1],
        record.wo[0],
        record.wo[1],
        2.0 * record.hf_depth - 1.0,
        2.0 * record.hf_height - 1.0,
    ]
}

/// Inverse of the UV channel mapping: unit feature in [-1, 1] → latent UV in [0, 1].
#[inline]
pub fn feature_uv(features: &[f32; CHANNELS]) -> Vec2 {
    Vec2::new((features[0] + 1.0) * 0.5, (features[1] + 1.0) * 0.5)
}
