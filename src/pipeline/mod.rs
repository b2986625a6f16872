//! Hybrid ray-tracing / neural-inference frame pipeline.
//!
//! One frame runs through a fixed phase cycle split across the two execution
//! domains. Every hand-off between domains goes through a fence token:
//!
//! ```text
//! host:         submit_frame ─────────────────────────────────────────── finish_frame
//!                   │ (latched model switch applied here)                     ▲
//! graphics:     trace → pack → t1                  wait(t2) → composite → t3 ─┘
//! accelerator:                  wait(t1) → infer → t2
//! ```
//!
//! Buffers written by one domain are read by the other only through
//! [`SharedBuffer::read_certified`] with the token that covers the write.

pub mod composite;
pub mod debug;
pub mod infer;
pub mod pack;
pub mod resources;
pub mod state;
pub mod trace;

pub use composite::{CompositeParams, CompositeStats, DisplayPixel, MID_GREY};
pub use debug::{PixelDebug, ProbeSample};
pub use infer::{InferenceBackend, RayonBackend};
pub use pack::PackStats;
pub use resources::{ImageBinding, ImageFormat, ResourceDesc};
pub use state::{FramePhase, PhaseCell};
pub use trace::{TraceParams, TraceStats};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::camera::Camera;
use crate::environment::{Environment, EnvironmentView, UniformEnvironment};
use crate::features::{OutputTexel, PackedFeature, ShadingFeatureRecord};
use crate::model::{ModelRegistry, NeuralMaterialModel};
use crate::quantize::ScaleBuffer;
use crate::scene::{SceneIntersector, TriangleScene};
use crate::settings::PipelineSettings;
use crate::synthesis::{TextureSynthesis, TileShuffle};
use crate::sync::{expect_len, CrossDomainSync, Domain, FenceToken, SharedBuffer, TimingSnapshot};
use crate::util::{Error, Result, Stage, Vec3};

/// Summary of one completed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub model: String,
    pub valid_pixels: usize,
    pub shadow_rays: usize,
    /// Packed records that consumed a scale lookup
    pub scale_lookups: usize,
    pub shaded_pixels: usize,
    pub background_pixels: usize,
    /// Wall time of the inference call
    pub inference_ms: f64,
    pub timing: TimingSnapshot,
}

/// Tokens recorded for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTokens {
    /// Graphics: features, valid mask, packed input and scales written
    pub packed: FenceToken,
    /// Accelerator: output written
    pub output: FenceToken,
    /// Graphics: display written
    pub done: FenceToken,
}

/// Per-pixel buffers shared by the queue jobs.
struct FrameBuffers {
    features: SharedBuffer<ShadingFeatureRecord>,
    valid: SharedBuffer<u32>,
    packed: SharedBuffer<PackedFeature>,
    scales: SharedBuffer<ScaleBuffer>,
    output: SharedBuffer<OutputTexel>,
    display: SharedBuffer<DisplayPixel>,
}

impl FrameBuffers {
    fn new(pixels: usize, scales: ScaleBuffer) -> Self {
        Self {
            features: SharedBuffer::new("features", pixels),
            valid: SharedBuffer::new("valid", pixels),
            packed: SharedBuffer::new("packed", pixels),
            scales: SharedBuffer::from_vec("scales", vec![scales]),
            output: SharedBuffer::new("output", pixels),
            display: SharedBuffer::new("display", pixels),
        }
    }

    fn resize(&self, pixels: usize) {
        self.features.resize(pixels);
        self.valid.resize(pixels);
        self.packed.resize(pixels);
        self.output.resize(pixels);
        self.display.resize(pixels);
    }
}

/// Outcome of the stages of one frame, filled by the queue jobs.
#[derive(Debug, Default)]
struct FrameStatus {
    error: Option<(Stage, Error)>,
    trace: TraceStats,
    pack: PackStats,
    inference_ms: f64,
    composite: CompositeStats,
}

impl FrameStatus {
    fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// First failure wins; later stages are skipped.
    fn fail(&mut self, stage: Stage, error: Error) {
        if self.error.is_none() {
            tracing::error!(%stage, %error, "stage failed");
            self.error = Some((stage, error));
        }
    }
}

/// Everything a frame's jobs read, captured at submission.
#[derive(Clone)]
struct FrameContext {
    frame: u64,
    extent: (u32, u32),
    camera: Camera,
    scene: Arc<dyn SceneIntersector>,
    environment: EnvironmentView,
    model: Arc<NeuralMaterialModel>,
    scales: ScaleBuffer,
    synthesis: Option<Arc<dyn TextureSynthesis>>,
    backend: Arc<dyn InferenceBackend>,
    settings: PipelineSettings,
}

impl FrameContext {
    fn trace_params(&self) -> TraceParams<'_> {
        TraceParams {
            frame: self.frame,
            extent: self.extent,
            camera: &self.camera,
            scene: &*self.scene,
            environment: &self.environment,
            height_field: self.model.height_field(),
            shadows: self.settings.traced_shadow_ray,
            hf_scale: self.settings.hf_scale,
            hf_steps: self.settings.hf_steps,
        }
    }

    fn composite_params(&self) -> CompositeParams<'_> {
        CompositeParams {
            frame: self.frame,
            extent: self.extent,
            camera: &self.camera,
            environment: &self.environment,
            hdr: self.model.info().hdr,
            show_traced_hf: self.settings.show_traced_hf,
            control: self.settings.control,
            curve: self.settings.curve,
            custom_curve: self.settings.custom_curve,
        }
    }
}

struct InFlight {
    frame: u64,
    model: String,
    tokens: FrameTokens,
    status: Arc<Mutex<FrameStatus>>,
}

/// The pipeline object: owns both execution domains, the model registry, the
/// shared per-pixel buffers and the control surface.
pub struct NeuralMatPipeline {
    sync: CrossDomainSync,
    registry: ModelRegistry,
    settings: PipelineSettings,
    extent: (u32, u32),

    scene: Arc<dyn SceneIntersector>,
    environment: Arc<dyn Environment>,
    backend: Arc<dyn InferenceBackend>,
    synthesis: Arc<dyn TextureSynthesis>,
    camera: Camera,

    buffers: Arc<FrameBuffers>,
    phase: Arc<PhaseCell>,
    has_previous: Arc<AtomicBool>,
    debug: Arc<Mutex<PixelDebug>>,

    frame: u64,
    /// Model requested by the host, applied at the next submission
    pending_model: Option<usize>,
    in_flight: Option<InFlight>,
    last_tokens: Option<FrameTokens>,
}

fn pixel_count(extent: (u32, u32)) -> usize {
    extent.0 as usize * extent.1 as usize
}

impl NeuralMatPipeline {
    /// Build the pipeline and load the configured model (or the first
    /// catalog entry when none is named).
    pub fn new(mut registry: ModelRegistry, settings: PipelineSettings, width: u32, height: u32) -> Result<Self> {
        let mut settings = settings.sanitized();
        registry.set_layout(settings.scale_layout);
        let index = if settings.model.is_empty() {
            0
        } else {
            registry.index_of(&settings.model)?
        };
        registry.activate(index)?;
        let scales = registry.scale_buffer(index)?;
        settings.model = registry.info(index)?.name.clone();

        let sync = CrossDomainSync::new()?;
        {
            let mut timer = sync.timer().lock();
            timer.set_window(settings.timing_window);
            timer.set_enabled(settings.timing_enabled);
        }

        let extent = (width, height);
        tracing::info!(width, height, model = %settings.model, layout = settings.scale_layout.name(), "pipeline created");
        Ok(Self {
            sync,
            registry,
            settings,
            extent,
            scene: Arc::new(TriangleScene::empty()),
            environment: Arc::new(UniformEnvironment::default()),
            backend: Arc::new(RayonBackend),
            synthesis: Arc::new(TileShuffle::default()),
            camera: Camera::default(),
            buffers: Arc::new(FrameBuffers::new(pixel_count(extent), scales)),
            phase: Arc::new(PhaseCell::default()),
            has_previous: Arc::new(AtomicBool::new(false)),
            debug: Arc::new(Mutex::new(PixelDebug::default())),
            frame: 0,
            pending_model: None,
            in_flight: None,
            last_tokens: None,
        })
    }

    /// Catalog and resident models.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Both execution domains, their fences and the inference timer.
    pub fn sync(&self) -> &CrossDomainSync {
        &self.sync
    }

    /// Render extent as `(width, height)`.
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    // ========================================================================
    // Scene & collaborators
    // ========================================================================

    /// Swap the scene. Drains in-flight work first; resets the frame counter,
    /// timing statistics and the fallback image.
    pub fn set_scene(&mut self, scene: Arc<dyn SceneIntersector>) -> Result<()> {
        self.drain()?;
        self.scene = scene;
        self.frame = 0;
        self.last_tokens = None;
        self.has_previous.store(false, Ordering::Release);
        self.sync.timer().lock().reset();
        self.debug.lock().clear();
        tracing::info!(empty = self.scene.is_empty(), "scene changed");
        Ok(())
    }

    /// Replace the scene with an empty one; every pixel becomes background.
    pub fn clear_scene(&mut self) -> Result<()> {
        self.set_scene(Arc::new(TriangleScene::empty()))
    }

    /// Used from the next submitted frame.
    pub fn set_environment(&mut self, environment: Arc<dyn Environment>) {
        self.environment = environment;
    }

    /// Used from the next submitted frame. Jitter comes from the settings.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    /// Camera as set by the host, without jitter.
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Swap the accelerator backend for subsequent frames.
    pub fn set_backend(&mut self, backend: Arc<dyn InferenceBackend>) {
        tracing::debug!(backend = backend.name(), "inference backend set");
        self.backend = backend;
    }

    /// UV remap applied while packing when `apply_synthesis` is set.
    pub fn set_synthesis(&mut self, synthesis: Arc<dyn TextureSynthesis>) {
        self.synthesis = synthesis;
    }

    // ========================================================================
    // Model selection
    // ========================================================================

    /// Load `name` now and latch it for the next frame.
    ///
    /// A load failure, or scales unusable under the current layout, is
    /// returned immediately and leaves both the active model and any earlier
    /// request untouched.
    pub fn request_model(&mut self, name: &str) -> Result<()> {
        let index = self.registry.index_of(name)?;
        self.registry.scale_buffer(index)?;
        self.registry.load_network(index)?;
        self.pending_model = Some(index);
        self.settings.model = name.to_string();
        tracing::debug!(model = name, "model switch latched");
        Ok(())
    }

    /// Model used by the most recently submitted frame.
    pub fn active_model(&self) -> Option<Arc<NeuralMaterialModel>> {
        self.registry.active()
    }

    fn apply_pending_model(&mut self) -> Result<()> {
        let Some(index) = self.pending_model.take() else {
            return Ok(());
        };
        let previous = self.registry.active_index();
        self.registry.activate(index)?;
        if let Some(prev) = previous.filter(|&p| p != index) {
            // Held until every accelerator job submitted so far has retired
            let token = self.sync.record_accelerator_complete()?;
            self.registry.retire(prev, token);
        }
        self.registry.collect_retired(&self.sync);
        Ok(())
    }

    // ========================================================================
    // Frame cycle
    // ========================================================================

    /// Enqueue one full frame on both domains and return the token that
    /// certifies its display image. Returns immediately.
    pub fn submit_frame(&mut self) -> Result<FenceToken> {
        if let Some(f) = &self.in_flight {
            return Err(Error::FrameInFlight(f.frame));
        }
        self.apply_pending_model()?;

        let index = self
            .registry
            .active_index()
            .ok_or_else(|| Error::stage(Stage::Registry, "no active model"))?;
        let model = self
            .registry
            .active()
            .ok_or_else(|| Error::stage(Stage::Registry, "active model is not resident"))?;
        let scales = self.registry.scale_buffer(index)?;

        let mut camera = self.camera;
        camera.jitter = self.settings.jitter;
        let ctx = FrameContext {
            frame: self.frame,
            extent: self.extent,
            camera,
            scene: self.scene.clone(),
            environment: EnvironmentView::new(self.environment.clone(), Vec3::from_array(self.settings.env_rotation)),
            model,
            scales,
            synthesis: self.settings.apply_synthesis.then(|| self.synthesis.clone()),
            backend: self.backend.clone(),
            settings: self.settings.clone(),
        };

        self.phase.advance(FramePhase::Tracing)?;
        let status = Arc::new(Mutex::new(FrameStatus::default()));
        let tokens = match self.enqueue(&ctx, &status) {
            Ok(t) => t,
            Err(e) => {
                self.phase.reset();
                return Err(e);
            }
        };

        tracing::debug!(frame = ctx.frame, model = %ctx.model.info().name, done = %tokens.done, "frame submitted");
        self.in_flight = Some(InFlight {
            frame: ctx.frame,
            model: ctx.model.info().name.clone(),
            tokens,
            status,
        });
        self.frame += 1;
        Ok(tokens.done)
    }

    fn enqueue(&self, ctx: &FrameContext, status: &Arc<Mutex<FrameStatus>>) -> Result<FrameTokens> {
        // Graphics: trace → pack
        {
            let ctx = ctx.clone();
            let bufs = self.buffers.clone();
            let phase = self.phase.clone();
            let status = status.clone();
            self.sync.graphics().submit(move || trace_and_pack(&ctx, &bufs, &phase, &status))?;
        }
        let packed = self.sync.record_graphics_complete()?;

        // Accelerator: infer, once the packed input is certified
        self.sync.accelerator_wait(packed)?;
        {
            let ctx = ctx.clone();
            let bufs = self.buffers.clone();
            let phase = self.phase.clone();
            let status = status.clone();
            let fence = self.sync.fence(Domain::Graphics).clone();
            let timer = self.sync.timer().clone();
            self.sync.accelerator().submit(move || {
                let _span = tracing::info_span!("inferring", frame = ctx.frame).entered();
                if let Err(e) = phase.advance(FramePhase::Inferring) {
                    status.lock().fail(Stage::Inference, e);
                }
                if status.lock().failed() {
                    return;
                }
                let result = (|| -> Result<f64> {
                    let packed_in = bufs.packed.read_certified(packed, &fence)?;
                    let valid = bufs.valid.read_certified(packed, &fence)?;
                    let scales = bufs.scales.read_certified(packed, &fence)?;
                    let scales = scales
                        .first()
                        .copied()
                        .ok_or_else(|| Error::stage(Stage::Inference, "scale buffer is empty"))?;
                    // A failed call never reaches the shared output
                    let mut scratch = vec![OutputTexel::ZERO; packed_in.len()];
                    let ms = infer::run_inference(&*ctx.backend, &ctx.model, &packed_in, &valid, &scales, &mut scratch, &timer)?;
                    bufs.output.write(Domain::Accelerator, |out| {
                        expect_len("output", out.len(), scratch.len())?;
                        out.copy_from_slice(&scratch);
                        Ok(ms)
                    })
                })();
                let mut st = status.lock();
                match result {
                    Ok(ms) => st.inference_ms = ms,
                    Err(e) => st.fail(Stage::Inference, e),
                }
            })?;
        }
        let output = self.sync.record_accelerator_complete()?;

        // Graphics: composite, once the output is certified
        self.sync.graphics_wait(output)?;
        {
            let ctx = ctx.clone();
            let bufs = self.buffers.clone();
            let phase = self.phase.clone();
            let status = status.clone();
            let fence = self.sync.fence(Domain::Accelerator).clone();
            let has_previous = self.has_previous.clone();
            let debug = self.debug.clone();
            self.sync.graphics().submit(move || {
                let _span = tracing::info_span!("compositing", frame = ctx.frame).entered();
                if let Err(e) = phase.advance(FramePhase::Compositing) {
                    status.lock().fail(Stage::Compositing, e);
                }
                let failed = status.lock().failed();
                let result = if failed {
                    None
                } else {
                    Some((|| -> Result<CompositeStats> {
                        let out = bufs.output.read_certified(output, &fence)?;
                        let valid = bufs.valid.read_unchecked();
                        let records = bufs.features.read_unchecked();
                        bufs.display.write(Domain::Graphics, |d| {
                            composite::composite(&ctx.composite_params(), &out, &valid, &records, d)
                        })
                    })())
                };
                match result {
                    Some(Ok(stats)) => {
                        has_previous.store(true, Ordering::Release);
                        status.lock().composite = stats;
                        capture_probe(&ctx, &bufs, &debug);
                    }
                    Some(Err(e)) => {
                        status.lock().fail(Stage::Compositing, e);
                        bufs.display
                            .write(Domain::Graphics, |d| composite::fallback(d, has_previous.load(Ordering::Acquire)));
                    }
                    None => {
                        bufs.display
                            .write(Domain::Graphics, |d| composite::fallback(d, has_previous.load(Ordering::Acquire)));
                    }
                }
                if let Err(e) = phase.advance(FramePhase::Idle) {
                    status.lock().fail(Stage::Compositing, e);
                    phase.reset();
                }
            })?;
        }
        let done = self.sync.record_graphics_complete()?;

        Ok(FrameTokens { packed, output, done })
    }

    /// Block until the submitted frame's display image is certified.
    ///
    /// A failed stage is reported as [`Error::FrameAbandoned`]; the display
    /// then holds the fallback image.
    pub fn finish_frame(&mut self) -> Result<FrameReport> {
        let f = self.in_flight.take().ok_or(Error::NoFrameInFlight)?;
        if !self.sync.wait_for(f.tokens.done) {
            return Err(Error::QueueClosed(Domain::Graphics.name()));
        }
        self.last_tokens = Some(f.tokens);
        self.registry.collect_retired(&self.sync);

        let mut status = std::mem::take(&mut *f.status.lock());
        let phase = self.phase.get();
        if phase != FramePhase::Idle && status.error.is_none() {
            // A job died without reporting; the fence still moved on
            let stage = match phase {
                FramePhase::Tracing => Stage::Tracing,
                FramePhase::Packing => Stage::Packing,
                FramePhase::Inferring => Stage::Inference,
                FramePhase::Idle | FramePhase::Compositing => Stage::Compositing,
            };
            status.fail(stage, Error::stage(stage, format!("job stopped in {phase} phase")));
        }
        self.phase.reset();

        if let Some((stage, source)) = status.error {
            tracing::warn!(frame = f.frame, %stage, error = %source, "frame abandoned");
            return Err(Error::FrameAbandoned {
                frame: f.frame,
                stage,
                source: Box::new(source),
            });
        }

        Ok(FrameReport {
            frame: f.frame,
            model: f.model,
            valid_pixels: status.trace.valid,
            shadow_rays: status.trace.shadow_rays,
            scale_lookups: status.pack.scale_lookups,
            shaded_pixels: status.composite.shaded,
            background_pixels: status.composite.background,
            inference_ms: status.inference_ms,
            timing: self.timing(),
        })
    }

    /// Submit and finish one frame.
    pub fn execute(&mut self) -> Result<FrameReport> {
        self.submit_frame()?;
        self.finish_frame()
    }

    fn drain(&mut self) -> Result<()> {
        if let Some(f) = self.in_flight.take() {
            self.sync.wait_for(f.tokens.done);
            if let Some((stage, e)) = f.status.lock().error.take() {
                tracing::debug!(frame = f.frame, %stage, error = %e, "discarding failed frame on drain");
            }
        }
        self.sync.drain()?;
        self.phase.reset();
        self.registry.collect_retired(&self.sync);
        Ok(())
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Reallocate every per-pixel buffer. Only allowed while idle.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(f) = &self.in_flight {
            return Err(Error::FrameInFlight(f.frame));
        }
        self.extent = (width, height);
        self.buffers.resize(pixel_count(self.extent));
        self.last_tokens = None;
        self.has_previous.store(false, Ordering::Release);
        self.debug.lock().clear();
        tracing::debug!(width, height, "pipeline resized");
        Ok(())
    }

    /// Image resources the pipeline exposes at the current extent.
    pub fn reflect(&self) -> Vec<ResourceDesc> {
        resources::reflect(self.extent)
    }

    /// Check host image bindings against the declared resources.
    pub fn configure(&self, bindings: &[ImageBinding]) -> Result<()> {
        resources::validate_bindings(self.extent, bindings)
    }

    // ========================================================================
    // Control surface
    // ========================================================================

    /// Current settings, with the active or latched model name.
    pub fn properties(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Adopt new settings. Model changes are latched like
    /// [`request_model`](Self::request_model); on error nothing changes.
    pub fn apply_settings(&mut self, settings: PipelineSettings) -> Result<()> {
        let settings = settings.sanitized();
        let previous_layout = self.registry.layout();
        self.registry.set_layout(settings.scale_layout);
        if let Err(e) = self.adopt_model(&settings) {
            self.registry.set_layout(previous_layout);
            return Err(e);
        }

        {
            let mut timer = self.sync.timer().lock();
            timer.set_window(settings.timing_window);
            timer.set_enabled(settings.timing_enabled);
        }
        let model = self.settings.model.clone();
        self.settings = settings;
        if self.settings.model.is_empty() {
            self.settings.model = model;
        }
        Ok(())
    }

    fn adopt_model(&mut self, settings: &PipelineSettings) -> Result<()> {
        // The model that will run next must have usable scales under the new layout
        let next = self.pending_model.or(self.registry.active_index());
        if let Some(i) = next {
            self.registry.scale_buffer(i)?;
        }
        if !settings.model.is_empty() && settings.model != self.settings.model {
            self.request_model(&settings.model)?;
        }
        Ok(())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Pick the pixel captured after each frame; `None` stops capturing.
    pub fn select_debug_pixel(&mut self, pixel: Option<(u32, u32)>) {
        self.debug.lock().select(pixel);
    }

    /// Latest capture for the selected pixel.
    pub fn debug_probe(&self) -> Option<ProbeSample> {
        self.debug.lock().latest().cloned()
    }

    /// Inference timing statistics since the last reset.
    pub fn timing(&self) -> TimingSnapshot {
        self.sync.timer().lock().snapshot()
    }

    /// Phase of the frame in flight, `Idle` between frames.
    pub fn phase(&self) -> FramePhase {
        self.phase.get()
    }

    /// Frames submitted since the last scene change.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    // ========================================================================
    // Certified host reads
    // ========================================================================

    fn certifying(&self, pick: fn(&FrameTokens) -> FenceToken) -> Option<FenceToken> {
        self.in_flight
            .as_ref()
            .map(|f| pick(&f.tokens))
            .or_else(|| self.last_tokens.as_ref().map(pick))
    }

    fn certified_copy<T: Clone>(&self, buffer: &SharedBuffer<T>, token: Option<FenceToken>) -> Result<Vec<T>> {
        match token {
            Some(t) => Ok(buffer.read_certified(t, self.sync.fence(t.domain))?.to_vec()),
            None => Ok(buffer.read_unchecked().to_vec()),
        }
    }

    /// Copy of the display image. Fails with [`Error::Uncertified`] while the
    /// frame writing it is still running.
    pub fn display_image(&self) -> Result<Vec<DisplayPixel>> {
        self.certified_copy(&self.buffers.display, self.certifying(|t| t.done))
    }

    /// Copy of the network output.
    pub fn output_buffer(&self) -> Result<Vec<OutputTexel>> {
        self.certified_copy(&self.buffers.output, self.certifying(|t| t.output))
    }

    /// Copy of the validity mask.
    pub fn valid_buffer(&self) -> Result<Vec<u32>> {
        self.certified_copy(&self.buffers.valid, self.certifying(|t| t.packed))
    }
}

impl Drop for NeuralMatPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            tracing::warn!(error = %e, "pipeline drain on drop failed");
        }
    }
}

/// First graphics job of a frame.
fn trace_and_pack(ctx: &FrameContext, bufs: &FrameBuffers, phase: &PhaseCell, status: &Mutex<FrameStatus>) {
    let span = tracing::info_span!("tracing", frame = ctx.frame);
    let traced = span.in_scope(|| {
        bufs.features.write(Domain::Graphics, |records| {
            bufs.valid
                .write(Domain::Graphics, |valid| trace::trace_frame(&ctx.trace_params(), records, valid))
        })
    });
    match traced {
        Ok(stats) => status.lock().trace = stats,
        Err(e) => status.lock().fail(Stage::Tracing, e),
    }

    if let Err(e) = phase.advance(FramePhase::Packing) {
        status.lock().fail(Stage::Packing, e);
    }
    if status.lock().failed() {
        return;
    }

    let _span = tracing::info_span!("packing", frame = ctx.frame).entered();
    bufs.scales.write(Domain::Graphics, |s| s.fill(ctx.scales));
    let records = bufs.features.read_unchecked();
    let synthesis = ctx.synthesis.as_deref();
    let packed = bufs
        .packed
        .write(Domain::Graphics, |packed| pack::pack_features(&records, &ctx.scales, synthesis, packed));
    match packed {
        Ok(stats) => status.lock().pack = stats,
        Err(e) => status.lock().fail(Stage::Packing, e),
    }
}

fn capture_probe(ctx: &FrameContext, bufs: &FrameBuffers, debug: &Mutex<PixelDebug>) {
    let mut debug = debug.lock();
    if debug.selected().is_none() {
        return;
    }
    let records = bufs.features.read_unchecked();
    let packed = bufs.packed.read_unchecked();
    let output = bufs.output.read_unchecked();
    let display = bufs.display.read_unchecked();
    debug.capture(ctx.frame, ctx.extent, &records, &packed, &ctx.scales, &output, &display);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::HeightField;
    use crate::model::{Catalog, ModelInfo, WeightsAsset};
    use crate::quantize::ScaleLayout;
    use crate::util::Vec2;
    use std::path::Path;

    fn info(name: &str) -> ModelInfo {
        let s = 1.0 / 127.0;
        ModelInfo {
            name: name.into(),
            asset: name.to_lowercase(),
            height_field: format!("{}.png", name.to_lowercase()),
            hdr: false,
            scales: [s, 0.0, s, 0.0, s, 0.0, s, 0.0],
        }
    }

    fn write_model(dir: &Path, name: &str, seed: u64) {
        WeightsAsset::synthetic(seed, 4)
            .unwrap()
            .write(&dir.join(format!("{}.nbtf", name.to_lowercase())))
            .unwrap();
        HeightField::from_fn(4, 4, |uv: Vec2| uv.y)
            .save(&dir.join(format!("{}.png", name.to_lowercase())))
            .unwrap();
    }

    fn pipeline(dir: &Path, w: u32, h: u32) -> NeuralMatPipeline {
        write_model(dir, "M1", 1);
        let catalog = Catalog::new(dir, vec![info("M1")]).unwrap();
        let registry = ModelRegistry::new(catalog, ScaleLayout::GroupPairs);
        NeuralMatPipeline::new(registry, PipelineSettings::default(), w, h).unwrap()
    }

    #[test]
    fn test_phase_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), 4, 4);
        assert_eq!(p.phase(), FramePhase::Idle);
        let report = p.execute().unwrap();
        assert_eq!(report.frame, 0);
        assert_eq!(report.model, "M1");
        assert_eq!(p.phase(), FramePhase::Idle);
        assert_eq!(p.frame_count(), 1);
    }

    #[test]
    fn test_in_flight_guards() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), 4, 4);
        assert!(matches!(p.finish_frame(), Err(Error::NoFrameInFlight)));
        p.submit_frame().unwrap();
        assert!(matches!(p.submit_frame(), Err(Error::FrameInFlight(0))));
        assert!(matches!(p.resize(8, 8), Err(Error::FrameInFlight(0))));
        p.finish_frame().unwrap();
        p.resize(8, 2).unwrap();
        p.execute().unwrap();
        assert_eq!(p.valid_buffer().unwrap().len(), 16);
    }

    #[test]
    fn test_apply_settings_rejects_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), 2, 2);
        let bad = PipelineSettings {
            model: "Nope".into(),
            ..Default::default()
        };
        assert!(matches!(p.apply_settings(bad), Err(Error::UnknownModel(_))));
        assert_eq!(p.properties().model, "M1");

        // Zero offsets are not usable as per-channel scales
        let bad = PipelineSettings {
            scale_layout: ScaleLayout::PerChannel,
            ..Default::default()
        };
        assert!(matches!(p.apply_settings(bad), Err(Error::InvalidCatalog(_))));
        assert_eq!(p.registry().layout(), ScaleLayout::GroupPairs);

        let good = PipelineSettings {
            model: String::new(),
            hf_steps: 0,
            ..Default::default()
        };
        p.apply_settings(good).unwrap();
        assert_eq!(p.properties().model, "M1");
        assert_eq!(p.properties().hf_steps, 1);
    }
}
