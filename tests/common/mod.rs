//! Shared fixtures: on-disk catalogs with synthetic models, scenes and backends.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use neural_btf::environment::UniformEnvironment;
use neural_btf::features::{OutputTexel, PackedFeature};
use neural_btf::heightfield::HeightField;
use neural_btf::model::{Catalog, ModelInfo, ModelRegistry, NeuralMaterialModel, WeightsAsset};
use neural_btf::pipeline::{InferenceBackend, RayonBackend};
use neural_btf::quantize::{ScaleBuffer, ScaleLayout};
use neural_btf::scene::TriangleScene;
use neural_btf::settings::PipelineSettings;
use neural_btf::util::{Error, Stage, Vec2, Vec3};
use neural_btf::{NeuralMatPipeline, Result};
use tempfile::TempDir;

pub const STEP: f32 = 1.0 / 127.0;
pub const BACKGROUND: f32 = 0.25;

pub fn model_info(name: &str, hdr: bool) -> ModelInfo {
    let stem = name.to_lowercase();
    ModelInfo {
        name: name.into(),
        asset: stem.clone(),
        height_field: format!("{stem}.png"),
        hdr,
        scales: [STEP, 0.0, STEP, 0.0, STEP, 0.0, STEP, 0.0],
    }
}

/// Synthetic weights plus a ramp height field next to each other in `dir`.
pub fn write_model(dir: &Path, name: &str, seed: u64) {
    let stem = name.to_lowercase();
    WeightsAsset::synthetic(seed, 8)
        .unwrap()
        .write(&dir.join(format!("{stem}.nbtf")))
        .unwrap();
    HeightField::from_fn(16, 16, |uv: Vec2| 0.5 + 0.4 * (uv.x - 0.5))
        .save(&dir.join(format!("{stem}.png")))
        .unwrap();
}

pub struct Fixture {
    pub dir: TempDir,
    pub catalog: Catalog,
}

/// Catalog of on-disk models with explicit scales.
pub fn fixture_with_scales(entries: &[(&str, u64, [f32; 8])]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let models = entries
        .iter()
        .map(|&(name, seed, scales)| {
            write_model(dir.path(), name, seed);
            ModelInfo {
                scales,
                ..model_info(name, false)
            }
        })
        .collect();
    let catalog = Catalog::new(dir.path(), models).unwrap();
    Fixture { dir, catalog }
}

/// Catalog listing `present` (written to disk, seeded) followed by `missing`
/// (catalogued only).
pub fn fixture(present: &[(&str, u64)], missing: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut models = Vec::new();
    for &(name, seed) in present {
        write_model(dir.path(), name, seed);
        models.push(model_info(name, false));
    }
    for &name in missing {
        models.push(model_info(name, false));
    }
    let catalog = Catalog::new(dir.path(), models).unwrap();
    Fixture { dir, catalog }
}

/// Camera-facing quad of side `size` at the origin.
pub fn quad_scene(size: f32) -> Arc<TriangleScene> {
    Arc::new(TriangleScene::new(
        TriangleScene::quad(Vec3::ZERO, Vec3::X, Vec3::Y, size, 1.0, 0).to_vec(),
    ))
}

pub fn environment() -> Arc<UniformEnvironment> {
    Arc::new(UniformEnvironment::new(
        Vec3::splat(BACKGROUND),
        Vec3::new(0.2, 0.3, 1.0),
        Vec3::ONE,
    ))
}

pub fn pipeline_with(fx: &Fixture, settings: PipelineSettings, w: u32, h: u32) -> NeuralMatPipeline {
    let registry = ModelRegistry::new(fx.catalog.clone(), ScaleLayout::GroupPairs);
    let mut p = NeuralMatPipeline::new(registry, settings, w, h).unwrap();
    p.set_environment(environment());
    p
}

pub fn pipeline(fx: &Fixture, w: u32, h: u32) -> NeuralMatPipeline {
    pipeline_with(fx, PipelineSettings::default(), w, h)
}

/// Backend whose every call fails like a lost device.
pub struct FailingBackend;

impl InferenceBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    fn infer(
        &self,
        _: &NeuralMaterialModel,
        _: &[PackedFeature],
        _: &[u32],
        _: &ScaleBuffer,
        _: &mut [OutputTexel],
    ) -> Result<()> {
        Err(Error::stage(Stage::Inference, "device lost"))
    }
}

/// CPU backend that stalls before computing.
pub struct SlowBackend(pub Duration);

impl InferenceBackend for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    fn infer(
        &self,
        model: &NeuralMaterialModel,
        packed: &[PackedFeature],
        valid: &[u32],
        scales: &ScaleBuffer,
        out: &mut [OutputTexel],
    ) -> Result<()> {
        std::thread::sleep(self.0);
        RayonBackend.infer(model, packed, valid, scales, out)
    }
}

/// Backend that fills the first half of the batch, then fails.
pub struct HalfWriteBackend;

impl InferenceBackend for HalfWriteBackend {
    fn name(&self) -> &str {
        "half-write"
    }

    fn infer(
        &self,
        _: &NeuralMaterialModel,
        _: &[PackedFeature],
        _: &[u32],
        _: &ScaleBuffer,
        out: &mut [OutputTexel],
    ) -> Result<()> {
        let half = out.len() / 2;
        out[..half].fill(OutputTexel::from_rgb([0.9; 3]));
        Err(Error::stage(Stage::Inference, "lost mid-batch"))
    }
}
