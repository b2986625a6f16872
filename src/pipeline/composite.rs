//! Display compositing: network output + validity → final image.

use rayon::prelude::*;

use crate::camera::Camera;
use crate::environment::EnvironmentView;
use crate::features::{OutputTexel, ShadingFeatureRecord};
use crate::settings::{ControlParams, CurveType};
use crate::sync::expect_len;
use crate::util::{Result, Vec3};

/// Mid-grey; contrast pivot and the fallback colour.
pub const MID_GREY: f32 = 0.18;

/// Highest network output accepted by the inverse tone map.
const HDR_MAX: f32 = 0.999;

/// One display pixel (linear RGBA, `Rgba32Float`).
pub type DisplayPixel = [f32; 4];

pub struct CompositeParams<'a> {
    pub frame: u64,
    pub extent: (u32, u32),
    pub camera: &'a Camera,
    pub environment: &'a EnvironmentView,
    /// Model outputs are tone-mapped HDR values
    pub hdr: bool,
    pub show_traced_hf: bool,
    pub control: ControlParams,
    pub curve: CurveType,
    pub custom_curve: [f32; 5],
}

/// Network output → linear reflectance.
#[inline]
pub fn decode_reflectance(y: Vec3, hdr: bool) -> Vec3 {
    if hdr {
        let y = y.clamp(Vec3::ZERO, Vec3::splat(HDR_MAX));
        y / (Vec3::ONE - y)
    } else {
        y
    }
}

/// Piecewise linear through five evenly spaced points; input clamped to [0, 1].
fn custom_curve(x: f32, points: &[f32; 5]) -> f32 {
    let t = x.clamp(0.0, 1.0) * 4.0;
    let i = (t.floor() as usize).min(3);
    let f = t - i as f32;
    points[i] + (points[i + 1] - points[i]) * f
}

/// Response curve on one channel.
pub fn apply_curve(x: f32, curve: CurveType, points: &[f32; 5]) -> f32 {
    match curve {
        CurveType::Linear => x,
        CurveType::Reinhard => x / (1.0 + x),
        CurveType::AcesFilm => {
            let (a, b, c, d, e) = (2.51, 0.03, 2.43, 0.59, 0.14);
            ((x * (a * x + b)) / (x * (c * x + d) + e)).clamp(0.0, 1.0)
        }
        CurveType::Custom => custom_curve(x, points),
    }
}

/// Exposure, contrast about mid-grey, black level, then the curve.
pub fn display_transform(color: Vec3, control: &ControlParams, curve: CurveType, points: &[f32; 5]) -> Vec3 {
    let c = color * control.exposure;
    let c = ((c - Vec3::splat(MID_GREY)) * control.contrast + Vec3::splat(MID_GREY)).max(Vec3::ZERO);
    let c = (c - Vec3::splat(control.black_level)).max(Vec3::ZERO);
    Vec3::new(
        apply_curve(c.x, curve, points),
        apply_curve(c.y, curve, points),
        apply_curve(c.z, curve, points),
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositeStats {
    pub shaded: usize,
    pub background: usize,
}

/// Write the display image from a certified output buffer.
///
/// Invalid pixels show the environment along the camera ray; the network
/// output for them is never read.
#[tracing::instrument(skip_all, fields(frame = p.frame, overlay = p.show_traced_hf))]
pub fn composite(
    p: &CompositeParams<'_>,
    output: &[OutputTexel],
    valid: &[u32],
    records: &[ShadingFeatureRecord],
    display: &mut [DisplayPixel],
) -> Result<CompositeStats> {
    let (w, h) = p.extent;
    let pixels = w as usize * h as usize;
    expect_len("output", output.len(), pixels)?;
    expect_len("valid", valid.len(), pixels)?;
    expect_len("features", records.len(), pixels)?;
    expect_len("display", display.len(), pixels)?;

    let light = p.environment.light();
    let mix = p.control.overlay_mix;

    let stats = display
        .par_iter_mut()
        .enumerate()
        .map(|(i, px)| {
            let color = if valid[i] != 0 {
                let rec = &records[i];
                let refl = decode_reflectance(output[i].rgb(), p.hdr);
                let shaded = refl * light.radiance * rec.light_visibility;
                if p.show_traced_hf {
                    shaded.lerp(Vec3::splat(rec.hf_depth), mix)
                } else {
                    shaded
                }
            } else {
                let (x, y) = ((i % w as usize) as u32, (i / w as usize) as u32);
                let ray = p.camera.primary_ray(x, y, p.extent, p.frame);
                p.environment.radiance(ray.dir)
            };
            let c = display_transform(color, &p.control, p.curve, &p.custom_curve);
            *px = [c.x, c.y, c.z, 1.0];
            if valid[i] != 0 {
                CompositeStats { shaded: 1, background: 0 }
            } else {
                CompositeStats { shaded: 0, background: 1 }
            }
        })
        .reduce(CompositeStats::default, |a, b| CompositeStats {
            shaded: a.shaded + b.shaded,
            background: a.background + b.background,
        });
    Ok(stats)
}

/// Frame abandoned: keep the previous image if there is one, else neutral grey.
pub fn fallback(display: &mut [DisplayPixel], has_previous: bool) {
    if !has_previous {
        display.fill([MID_GREY, MID_GREY, MID_GREY, 1.0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Environment, UniformEnvironment};
    use std::sync::Arc;

    const POINTS: [f32; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

    #[test]
    fn test_default_transform_is_identity() {
        let c = Vec3::new(0.05, 0.5, 2.0);
        let out = display_transform(c, &ControlParams::default(), CurveType::Linear, &POINTS);
        assert!((out - c).length() < 1e-6);
    }

    #[test]
    fn test_curves() {
        assert!((apply_curve(1.0, CurveType::Reinhard, &POINTS) - 0.5).abs() < 1e-6);
        assert!(apply_curve(100.0, CurveType::AcesFilm, &POINTS) <= 1.0);
        assert_eq!(apply_curve(0.0, CurveType::AcesFilm, &POINTS), 0.0);
        let pts = [0.0, 0.5, 0.6, 0.7, 1.0];
        assert!((apply_curve(0.125, CurveType::Custom, &pts) - 0.25).abs() < 1e-6);
        assert_eq!(apply_curve(2.0, CurveType::Custom, &pts), 1.0);
    }

    #[test]
    fn test_hdr_decode() {
        let y = Vec3::new(0.5, 0.0, 1.0);
        assert_eq!(decode_reflectance(y, false), y);
        let r = decode_reflectance(y, true);
        assert!((r.x - 1.0).abs() < 1e-6);
        assert_eq!(r.y, 0.0);
        assert!(r.z.is_finite());
    }

    #[test]
    fn test_composite_background_and_shading() {
        let env: Arc<dyn Environment> = Arc::new(UniformEnvironment::new(Vec3::splat(0.3), Vec3::Z, Vec3::splat(2.0)));
        let env = EnvironmentView::new(env, Vec3::ZERO);
        let camera = Camera::default();
        let params = CompositeParams {
            frame: 0,
            extent: (2, 1),
            camera: &camera,
            environment: &env,
            hdr: false,
            show_traced_hf: false,
            control: ControlParams::default(),
            curve: CurveType::Linear,
            custom_curve: POINTS,
        };
        let output = vec![OutputTexel::from_rgb([0.25, 0.5, 0.125]), OutputTexel::from_rgb([1.0; 3])];
        let valid = vec![1, 0];
        let records = vec![
            ShadingFeatureRecord { valid: 1, light_visibility: 1.0, hf_depth: 0.75, ..Default::default() },
            ShadingFeatureRecord::INVALID,
        ];
        let mut display = vec![[0.0; 4]; 2];
        let stats = composite(&params, &output, &valid, &records, &mut display).unwrap();
        assert_eq!(stats, CompositeStats { shaded: 1, background: 1 });

        let expected = display_transform(Vec3::new(0.5, 1.0, 0.25), &params.control, params.curve, &POINTS);
        assert!((Vec3::new(display[0][0], display[0][1], display[0][2]) - expected).length() < 1e-5);
        let bg = display_transform(Vec3::splat(0.3), &params.control, params.curve, &POINTS);
        assert!((Vec3::new(display[1][0], display[1][1], display[1][2]) - bg).length() < 1e-6);

        // Overlay replaces shading on valid pixels only
        let overlay = CompositeParams { show_traced_hf: true, ..params };
        composite(&overlay, &output, &valid, &records, &mut display).unwrap();
        let grey = display_transform(Vec3::splat(0.75), &overlay.control, overlay.curve, &POINTS);
        assert!((Vec3::new(display[0][0], display[0][1], display[0][2]) - grey).length() < 1e-5);
        assert!((Vec3::new(display[1][0], display[1][1], display[1][2]) - bg).length() < 1e-6);
    }

    #[test]
    fn test_fallback() {
        let mut display = vec![[0.5, 0.5, 0.5, 1.0]; 3];
        fallback(&mut display, true);
        assert_eq!(display[0], [0.5, 0.5, 0.5, 1.0]);
        fallback(&mut display, false);
        assert_eq!(display[2], [MID_GREY, MID_GREY, MID_GREY, 1.0]);
    }
}
