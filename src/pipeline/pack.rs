//! Feature packing: records → quantized network input.

use rayon::prelude::*;

use crate::features::{project_features, PackedFeature, ShadingFeatureRecord};
use crate::quantize::{ScaleBuffer, CHANNELS};
use crate::synthesis::TextureSynthesis;
use crate::sync::expect_len;
use crate::util::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub valid: usize,
    /// Records that went through the scale buffer; misses never do
    pub scale_lookups: usize,
}

/// Project, optionally remap, and quantize every valid record.
///
/// Invalid records are written as all-zero payloads.
#[tracing::instrument(skip_all, fields(pixels = records.len(), layout = scales.layout().name()))]
pub fn pack_features(
    records: &[ShadingFeatureRecord],
    scales: &ScaleBuffer,
    synthesis: Option<&dyn TextureSynthesis>,
    packed: &mut [PackedFeature],
) -> Result<PackStats> {
    expect_len("packed", packed.len(), records.len())?;

    let stats = packed
        .par_iter_mut()
        .zip(records.par_iter())
        .map(|(out, rec)| {
            if !rec.is_valid() {
                *out = [0; CHANNELS];
                return PackStats::default();
            }
            *out = scales.pack_unit(&project_features(rec, synthesis));
            PackStats { valid: 1, scale_lookups: 1 }
        })
        .reduce(PackStats::default, |a, b| PackStats {
            valid: a.valid + b.valid,
            scale_lookups: a.scale_lookups + b.scale_lookups,
        });
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::ScaleLayout;
    use crate::synthesis::TileShuffle;

    fn scales() -> ScaleBuffer {
        let s = 1.0 / 127.0;
        ScaleBuffer::new([s, 0.0, s, 0.0, s, 0.0, s, 0.0], ScaleLayout::GroupPairs).unwrap()
    }

    fn hit(uv: [f32; 2]) -> ShadingFeatureRecord {
        ShadingFeatureRecord {
            valid: 1,
            uv,
            hf_uv: uv,
            wi: [0.0, 0.0, 1.0],
            wo: [0.0, 0.0, 1.0],
            hf_depth: 0.5,
            hf_height: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_misses_pack_zero_without_lookup() {
        let records = vec![hit([0.875, 0.125]), ShadingFeatureRecord::INVALID, hit([0.5, 0.5]), ShadingFeatureRecord::INVALID];
        let mut packed = vec![[9i8; CHANNELS]; 4];
        let stats = pack_features(&records, &scales(), None, &mut packed).unwrap();

        assert_eq!(stats, PackStats { valid: 2, scale_lookups: 2 });
        assert_eq!(packed[1], [0; CHANNELS]);
        assert_eq!(packed[3], [0; CHANNELS]);
        // uv 0.875 → 0.75 → 95.25
        assert_eq!(packed[0][0], 95);
        assert_eq!(packed[0][1], -95);
        assert_eq!(packed[2][..2], [0, 0]);
    }

    #[test]
    fn test_synthesis_changes_uv_only() {
        let records = vec![hit([0.3, 0.6])];
        let mut plain = vec![[0i8; CHANNELS]; 1];
        let mut shuffled = vec![[0i8; CHANNELS]; 1];
        pack_features(&records, &scales(), None, &mut plain).unwrap();
        let shuffle = TileShuffle::new(11);
        pack_features(&records, &scales(), Some(&shuffle), &mut shuffled).unwrap();
        assert_eq!(plain[0][2..], shuffled[0][2..]);
    }

    #[test]
    fn test_builtin_scales_keep_uvs_distinct() {
        let catalog = crate::model::Catalog::builtin("assets");
        for info in catalog.models() {
            let scales = ScaleBuffer::new(info.scales, ScaleLayout::GroupPairs).unwrap();
            let records: Vec<_> = [0.1, 0.3, 0.75, 0.9, 0.99].iter().map(|&u| hit([u, u])).collect();
            let mut packed = vec![[0i8; CHANNELS]; records.len()];
            pack_features(&records, &scales, None, &mut packed).unwrap();

            let u: Vec<i8> = packed.iter().map(|p| p[0]).collect();
            assert!(u.windows(2).all(|w| w[0] < w[1]), "{}: {u:?}", info.name);
            assert!(u.iter().all(|&q| q.abs() < 127), "{}: {u:?}", info.name);
        }
    }

    #[test]
    fn test_size_mismatch() {
        let records = vec![ShadingFeatureRecord::INVALID; 3];
        let mut packed = vec![[0i8; CHANNELS]; 2];
        assert!(pack_features(&records, &scales(), None, &mut packed).is_err());
    }
}
