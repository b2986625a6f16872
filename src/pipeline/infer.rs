//! Inference stage and the accelerator backend seam.

use std::time::Instant;

use parking_lot::Mutex;

use crate::features::{OutputTexel, PackedFeature};
use crate::model::NeuralMaterialModel;
use crate::quantize::ScaleBuffer;
use crate::sync::InferenceTimer;
use crate::util::Result;

/// Evaluates a model over a whole packed batch in one call.
///
/// Implementations must either fill `out` completely or return an error; the
/// pipeline never reads `out` after a failed call.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn infer(
        &self,
        model: &NeuralMaterialModel,
        packed: &[PackedFeature],
        valid: &[u32],
        scales: &ScaleBuffer,
        out: &mut [OutputTexel],
    ) -> Result<()>;
}

/// Data-parallel CPU backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonBackend;

impl InferenceBackend for RayonBackend {
    fn name(&self) -> &str {
        "rayon"
    }

    fn infer(
        &self,
        model: &NeuralMaterialModel,
        packed: &[PackedFeature],
        valid: &[u32],
        scales: &ScaleBuffer,
        out: &mut [OutputTexel],
    ) -> Result<()> {
        model.evaluate(packed, valid, scales, out)
    }
}

/// One timed backend call. Only successful calls feed the timer.
pub fn run_inference(
    backend: &dyn InferenceBackend,
    model: &NeuralMaterialModel,
    packed: &[PackedFeature],
    valid: &[u32],
    scales: &ScaleBuffer,
    out: &mut [OutputTexel],
    timer: &Mutex<InferenceTimer>,
) -> Result<f64> {
    let start = Instant::now();
    backend.infer(model, packed, valid, scales, out)?;
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    timer.lock().record(ms);
    tracing::trace!(backend = backend.name(), ms, "inference call");
    Ok(ms)
}
