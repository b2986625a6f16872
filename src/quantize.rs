//! Feature quantization.
//!
//! The eight per-model scale values drive a symmetric-range int8 mapping of
//! the eight packed feature channels. How the eight values are read is a
//! [`ScaleLayout`]:
//!
//! | Layout | Reading | Zero point |
//! |---|---|---|
//! | `GroupPairs` | `(scale, offset)` per group `[uv, wi, wo, aux]`, two channels each | `round(offset / scale)` |
//! | `PerChannel` | one scale per channel | 0 |
//!
//! `q = clamp(round(x / scale) + zp, -127, 127)`, `x' = (q - zp) * scale`.
//!
//! Projected features arrive in [-1, 1] and are first mapped linearly onto
//! each channel's [`domain`](ChannelQuant::domain), so the full int8 range is
//! used whatever the model's scales are.

use serde::{Deserialize, Serialize};

use crate::util::{Error, Result};

/// Packed channels per shading point.
pub const CHANNELS: usize = btf_mlp::FEATURE_CHANNELS;
/// Logical feature groups.
pub const GROUPS: usize = 4;
/// Scale values carried by every catalog entry.
pub const SCALE_COUNT: usize = 8;

const QMAX: i32 = btf_mlp::QMAX;

/// Interpretation of the eight catalog scale values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleLayout {
    #[default]
    GroupPairs,
    PerChannel,
}

impl ScaleLayout {
    pub fn name(&self) -> &'static str {
        match self {
            ScaleLayout::GroupPairs => "group_pairs",
            ScaleLayout::PerChannel => "per_channel",
        }
    }
}

/// Affine int8 mapping for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelQuant {
    pub scale: f32,
    pub zero_point: i32,
}

impl ChannelQuant {
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self {
            scale,
            zero_point: zero_point.clamp(-QMAX, QMAX),
        }
    }

    /// Out-of-range values clamp; non-finite values map to the zero point.
    #[inline]
    pub fn quantize(&self, x: f32) -> i8 {
        if !x.is_finite() {
            return self.zero_point as i8;
        }
        let q = (x / self.scale).round().clamp(-(2.0 * QMAX as f32), 2.0 * QMAX as f32) as i32;
        (q + self.zero_point).clamp(-QMAX, QMAX) as i8
    }

    #[inline]
    pub fn dequantize(&self, q: i8) -> f32 {
        (q as i32 - self.zero_point) as f32 * self.scale
    }

    /// Closed interval that round-trips without clamping.
    pub fn domain(&self) -> (f32, f32) {
        (
            (-QMAX - self.zero_point) as f32 * self.scale,
            (QMAX - self.zero_point) as f32 * self.scale,
        )
    }

    /// [-1, 1] → [`domain`](Self::domain), clamping outside values.
    #[inline]
    pub fn from_unit(&self, v: f32) -> f32 {
        let (lo, hi) = self.domain();
        lo + (v.clamp(-1.0, 1.0) + 1.0) * 0.5 * (hi - lo)
    }

    /// Inverse of [`from_unit`](Self::from_unit).
    #[inline]
    pub fn to_unit(&self, x: f32) -> f32 {
        let (lo, hi) = self.domain();
        2.0 * (x - lo) / (hi - lo) - 1.0
    }
}

/// Per-channel quantization derived from one model's scales.
///
/// Travels with the packed buffer so inference dequantizes with exactly the
/// parameters the packer used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBuffer {
    layout: ScaleLayout,
    raw: [f32; SCALE_COUNT],
    channels: [ChannelQuant; CHANNELS],
}

impl ScaleBuffer {
    /// Interpret `raw` through `layout`. Every value used as a scale must be
    /// finite and positive; offsets only need to be finite.
    pub fn new(raw: [f32; SCALE_COUNT], layout: ScaleLayout) -> Result<Self> {
        let check = |i: usize, v: f32, positive: bool| -> Result<()> {
            if !v.is_finite() || (positive && v <= 0.0) {
                return Err(Error::InvalidCatalog(format!(
                    "scale value {i} ({v}) unusable for {} layout",
                    layout.name()
                )));
            }
            Ok(())
        };

        let mut channels = [ChannelQuant::new(1.0, 0); CHANNELS];
        match layout {
            ScaleLayout::GroupPairs => {
                for g in 0..GROUPS {
                    let (scale, offset) = (raw[2 * g], raw[2 * g + 1]);
                    check(2 * g, scale, true)?;
                    check(2 * g + 1, offset, false)?;
                    let zp = (offset / scale).round() as i32;
                    let q = ChannelQuant::new(scale, zp);
                    channels[2 * g] = q;
                    channels[2 * g + 1] = q;
                }
            }
            ScaleLayout::PerChannel => {
                for (c, &scale) in raw.iter().enumerate() {
                    check(c, scale, true)?;
                    channels[c] = ChannelQuant::new(scale, 0);
                }
            }
        }
        Ok(Self { layout, raw, channels })
    }

    pub fn layout(&self) -> ScaleLayout {
        self.layout
    }

    pub fn raw(&self) -> &[f32; SCALE_COUNT] {
        &self.raw
    }

    pub fn channel(&self, c: usize) -> &ChannelQuant {
        &self.channels[c]
    }

    pub fn channels(&self) -> &[ChannelQuant; CHANNELS] {
        &self.channels
    }

    pub fn quantize(&self, features: &[f32; CHANNELS]) -> [i8; CHANNELS] {
        std::array::from_fn(|c| self.channels[c].quantize(features[c]))
    }

    pub fn dequantize(&self, packed: &[i8; CHANNELS]) -> [f32; CHANNELS] {
        std::array::from_fn(|c| self.channels[c].dequantize(packed[c]))
    }

    /// Quantize features given in [-1, 1], each spread over its channel domain.
    pub fn pack_unit(&self, unit: &[f32; CHANNELS]) -> [i8; CHANNELS] {
        std::array::from_fn(|c| {
            let q = &self.channels[c];
            q.quantize(q.from_unit(unit[c]))
        })
    }

    /// Packed input back to [-1, 1].
    pub fn unpack_unit(&self, packed: &[i8; CHANNELS]) -> [f32; CHANNELS] {
        std::array::from_fn(|c| {
            let q = &self.channels[c];
            q.to_unit(q.dequantize(packed[c]))
        })
    }
}
