//! Per-pixel debug probe.

use crate::features::{OutputTexel, PackedFeature, ShadingFeatureRecord};
use crate::quantize::{ScaleBuffer, CHANNELS};

use super::composite::DisplayPixel;

/// Intermediate values of one pixel, captured by the composite job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    pub frame: u64,
    pub pixel: (u32, u32),
    pub record: ShadingFeatureRecord,
    pub packed: PackedFeature,
    /// `packed` dequantized with the frame's scales
    pub features: [f32; CHANNELS],
    pub raw_output: [f32; 3],
    pub display: DisplayPixel,
}

/// Host-selected pixel and the latest capture for it.
#[derive(Debug, Default)]
pub struct PixelDebug {
    selected: Option<(u32, u32)>,
    latest: Option<ProbeSample>,
}

impl PixelDebug {
    /// Select a pixel (or none). Drops a capture for a different pixel.
    pub fn select(&mut self, pixel: Option<(u32, u32)>) {
        if self.selected != pixel {
            self.latest = None;
        }
        self.selected = pixel;
    }

    pub fn selected(&self) -> Option<(u32, u32)> {
        self.selected
    }

    pub fn latest(&self) -> Option<&ProbeSample> {
        self.latest.as_ref()
    }

    pub fn clear(&mut self) {
        self.latest = None;
    }

    /// Buffer index of the selected pixel, if it lies inside `extent`.
    pub fn index(&self, extent: (u32, u32)) -> Option<usize> {
        let (x, y) = self.selected?;
        (x < extent.0 && y < extent.1).then(|| y as usize * extent.0 as usize + x as usize)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn capture(
        &mut self,
        frame: u64,
        extent: (u32, u32),
        records: &[ShadingFeatureRecord],
        packed: &[PackedFeature],
        scales: &ScaleBuffer,
        output: &[OutputTexel],
        display: &[DisplayPixel],
    ) {
        let Some(i) = self.index(extent) else {
            return;
        };
        let (Some(record), Some(p), Some(o), Some(d)) = (records.get(i), packed.get(i), output.get(i), display.get(i)) else {
            return;
        };
        self.latest = Some(ProbeSample {
            frame,
            pixel: ((i % extent.0 as usize) as u32, (i / extent.0 as usize) as u32),
            record: *record,
            packed: *p,
            features: scales.dequantize(p),
            raw_output: o.rgb().to_array(),
            display: *d,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::ScaleLayout;

    #[test]
    fn test_capture_selected_pixel() {
        let scales = ScaleBuffer::new([0.5, 0.0, 0.5, 0.0, 0.5, 0.0, 0.5, 0.0], ScaleLayout::GroupPairs).unwrap();
        let extent = (3, 2);
        let records = vec![ShadingFeatureRecord::INVALID; 6];
        let mut packed = vec![[0i8; CHANNELS]; 6];
        packed[4] = [2, -2, 0, 0, 0, 0, 1, 1];
        let output = vec![OutputTexel::ZERO; 6];
        let display = vec![[0.1, 0.2, 0.3, 1.0]; 6];

        let mut dbg = PixelDebug::default();
        dbg.capture(1, extent, &records, &packed, &scales, &output, &display);
        assert!(dbg.latest().is_none());

        dbg.select(Some((1, 1)));
        assert_eq!(dbg.index(extent), Some(4));
        dbg.capture(2, extent, &records, &packed, &scales, &output, &display);
        let s = dbg.latest().unwrap();
        assert_eq!(s.frame, 2);
        assert_eq!(s.pixel, (1, 1));
        assert_eq!(s.packed, packed[4]);
        assert_eq!(s.features[0], 1.0);
        assert_eq!(s.features[1], -1.0);
        assert_eq!(s.display, [0.1, 0.2, 0.3, 1.0]);

        // Outside the image: nothing captured, previous capture dropped on reselect
        dbg.select(Some((5, 0)));
        assert!(dbg.latest().is_none());
        assert_eq!(dbg.index(extent), None);
    }
}
