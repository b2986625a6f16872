//! Ray-tracing stage: one primary ray per pixel into a feature record.

use rayon::prelude::*;

use crate::camera::Camera;
use crate::environment::EnvironmentView;
use crate::features::ShadingFeatureRecord;
use crate::heightfield::HeightField;
use crate::scene::{Ray, SceneIntersector};
use crate::sync::expect_len;
use crate::util::{Frame, Result};

/// Offset along the normal for shadow-ray origins.
const SHADOW_BIAS: f32 = 1e-3;

/// Everything the stage reads besides its output buffers.
pub struct TraceParams<'a> {
    pub frame: u64,
    pub extent: (u32, u32),
    pub camera: &'a Camera,
    pub scene: &'a dyn SceneIntersector,
    pub environment: &'a EnvironmentView,
    pub height_field: &'a HeightField,
    pub shadows: bool,
    pub hf_scale: f32,
    pub hf_steps: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub valid: usize,
    pub shadow_rays: usize,
}

/// Trace the whole image. Misses leave a zeroed, invalid record.
#[tracing::instrument(skip_all, fields(frame = p.frame, width = p.extent.0, height = p.extent.1))]
pub fn trace_frame(p: &TraceParams<'_>, records: &mut [ShadingFeatureRecord], valid: &mut [u32]) -> Result<TraceStats> {
    let (w, h) = p.extent;
    let pixels = w as usize * h as usize;
    expect_len("features", records.len(), pixels)?;
    expect_len("valid", valid.len(), pixels)?;
    if pixels == 0 {
        return Ok(TraceStats::default());
    }

    let light = p.environment.light();
    let stats = records
        .par_chunks_mut(w as usize)
        .zip(valid.par_chunks_mut(w as usize))
        .enumerate()
        .map(|(y, (rec_row, valid_row))| {
            let mut stats = TraceStats::default();
            for (x, (rec, v)) in rec_row.iter_mut().zip(valid_row.iter_mut()).enumerate() {
                let ray = p.camera.primary_ray(x as u32, y as u32, p.extent, p.frame);
                let Some(hit) = p.scene.intersect(&ray) else {
                    *rec = ShadingFeatureRecord::INVALID;
                    *v = 0;
                    continue;
                };

                let frame = Frame::new(hit.normal, hit.tangent);
                let wo = frame.to_local(-ray.dir);
                let wi = frame.to_local(light.direction);

                let visibility = if wi.z <= 0.0 {
                    0.0
                } else if p.shadows {
                    stats.shadow_rays += 1;
                    let shadow = Ray::new(hit.position + hit.normal * SHADOW_BIAS, light.direction);
                    if p.scene.occluded(&shadow, f32::INFINITY) { 0.0 } else { 1.0 }
                } else {
                    1.0
                };

                let probe = p.height_field.march(hit.uv, wo, p.hf_scale, p.hf_steps);

                *rec = ShadingFeatureRecord {
                    position: hit.position.to_array(),
                    valid: 1,
                    normal: frame.normal.to_array(),
                    light_visibility: visibility,
                    tangent: frame.tangent.to_array(),
                    hf_depth: probe.depth,
                    uv: hit.uv.to_array(),
                    hf_uv: probe.uv.to_array(),
                    wi: wi.to_array(),
                    hf_height: probe.height,
                    wo: wo.to_array(),
                    _pad: 0,
                };
                *v = 1;
                stats.valid += 1;
            }
            stats
        })
        .reduce(TraceStats::default, |a, b| TraceStats {
            valid: a.valid + b.valid,
            shadow_rays: a.shadow_rays + b.shadow_rays,
        });

    tracing::debug!(valid = stats.valid, shadow_rays = stats.shadow_rays, "trace done");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Environment, UniformEnvironment};
    use crate::scene::TriangleScene;
    use crate::util::Vec3;
    use std::sync::Arc;

    fn env(light: Vec3) -> EnvironmentView {
        let e: Arc<dyn Environment> = Arc::new(UniformEnvironment::new(Vec3::ZERO, light, Vec3::ONE));
        EnvironmentView::new(e, Vec3::ZERO)
    }

    fn run(scene: &TriangleScene, env: &EnvironmentView, extent: (u32, u32), shadows: bool) -> (Vec<ShadingFeatureRecord>, Vec<u32>, TraceStats) {
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO);
        let hf = HeightField::flat(1.0);
        let n = (extent.0 * extent.1) as usize;
        let mut records = vec![ShadingFeatureRecord::default(); n];
        let mut valid = vec![7u32; n];
        let params = TraceParams {
            frame: 1,
            extent,
            camera: &camera,
            scene,
            environment: env,
            height_field: &hf,
            shadows,
            hf_scale: 0.05,
            hf_steps: 8,
        };
        let stats = trace_frame(&params, &mut records, &mut valid).unwrap();
        (records, valid, stats)
    }

    #[test]
    fn test_empty_scene_all_invalid() {
        let (records, valid, stats) = run(&TriangleScene::empty(), &env(Vec3::Z), (4, 3), true);
        assert_eq!(stats.valid, 0);
        assert!(valid.iter().all(|&v| v == 0));
        assert!(records.iter().all(|r| *r == ShadingFeatureRecord::INVALID));
    }

    #[test]
    fn test_quad_hits_have_local_directions() {
        let scene = TriangleScene::new(TriangleScene::quad(Vec3::ZERO, Vec3::X, Vec3::Y, 10.0, 1.0, 0).to_vec());
        let (records, valid, stats) = run(&scene, &env(Vec3::Z), (5, 5), true);
        assert_eq!(stats.valid, 25);
        assert!(valid.iter().all(|&v| v == 1));
        let centre = &records[12];
        assert!((centre.wo()[2] - 1.0).abs() < 1e-4);
        assert!((centre.wi()[2] - 1.0).abs() < 1e-4);
        assert_eq!(centre.light_visibility, 1.0);
    }

    #[test]
    fn test_shadow_toggle() {
        // Occluder floating above the quad
        let mut tris = TriangleScene::quad(Vec3::ZERO, Vec3::X, Vec3::Y, 10.0, 1.0, 0).to_vec();
        tris.extend(TriangleScene::quad(Vec3::new(0.0, 0.0, 1.0), Vec3::X, Vec3::Y, 0.6, 1.0, 1));
        let scene = TriangleScene::new(tris);

        // Oblique light so the shadow lands on pixels that still see the quad
        let light = Vec3::new(0.0, -1.0, 1.0);
        let (on, _, on_stats) = run(&scene, &env(light), (9, 9), true);
        let (off, _, off_stats) = run(&scene, &env(light), (9, 9), false);
        assert!(on_stats.shadow_rays > 0);
        assert_eq!(off_stats.shadow_rays, 0);
        assert!(off.iter().filter(|r| r.is_valid()).all(|r| r.light_visibility == 1.0));
        assert!(on.iter().filter(|r| r.is_valid()).any(|r| r.light_visibility == 0.0));
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let camera = Camera::default();
        let hf = HeightField::flat(1.0);
        let scene = TriangleScene::empty();
        let env = env(Vec3::Z);
        let params = TraceParams {
            frame: 0,
            extent: (2, 2),
            camera: &camera,
            scene: &scene,
            environment: &env,
            height_field: &hf,
            shadows: false,
            hf_scale: 0.0,
            hf_steps: 1,
        };
        let mut records = vec![ShadingFeatureRecord::default(); 3];
        let mut valid = vec![0; 4];
        assert!(trace_frame(&params, &mut records, &mut valid).is_err());
    }
}
