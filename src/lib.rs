//! # Neural BTF
//!
//! Hybrid renderer for quantized neural BTF materials: a ray tracer produces
//! per-pixel shading features, a packer quantizes them, a small int8 network
//! decodes reflectance, and a compositor writes the display image. Tracing and
//! compositing run on the graphics domain, inference on the accelerator
//! domain; the two only meet through fence tokens.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math re-exports, hashing
//! - [`scene`] - Scene boundary and the BVH triangle scene
//! - [`camera`] - Primary rays
//! - [`environment`] - Background radiance and the dominant light
//! - [`heightfield`] - Height-field asset and parallax probe
//! - [`synthesis`] - Texture-tiling mitigation
//! - [`quantize`] - Scale layouts and int8 feature quantization
//! - [`features`] - Per-pixel buffer element types
//! - [`model`] - Catalog, weights assets, model registry
//! - [`sync`] - Execution domains, fences, shared buffers, timing
//! - [`pipeline`] - The frame pipeline and its stages
//! - [`settings`] - Control surface
//!
//! ## Example
//!
//! ```ignore
//! use neural_btf::prelude::*;
//!
//! let catalog = Catalog::load(Path::new("models/catalog.json"))?;
//! let registry = ModelRegistry::new(catalog, ScaleLayout::default());
//! let mut pipeline = NeuralMatPipeline::new(registry, PipelineSettings::default(), 512, 512)?;
//! pipeline.set_scene(Arc::new(TriangleScene::new(triangles)))?;
//! let report = pipeline.execute()?;
//! let image = pipeline.display_image()?;
//! ```

pub mod camera;
pub mod environment;
pub mod features;
pub mod heightfield;
pub mod model;
pub mod pipeline;
pub mod quantize;
pub mod scene;
pub mod settings;
pub mod sync;
pub mod synthesis;
pub mod util;

// Re-export commonly used types
pub use pipeline::{FrameReport, NeuralMatPipeline};
pub use util::{Error, ErrorKind, Result, Stage};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::camera::Camera;
    pub use crate::environment::{Environment, EquirectEnvironment, UniformEnvironment};
    pub use crate::model::{Catalog, ModelInfo, ModelRegistry, NeuralMaterialModel, WeightsAsset};
    pub use crate::pipeline::{FramePhase, FrameReport, ImageBinding, InferenceBackend, NeuralMatPipeline, RayonBackend};
    pub use crate::quantize::{ScaleBuffer, ScaleLayout};
    pub use crate::scene::{SceneIntersector, TriangleScene};
    pub use crate::settings::{ControlParams, CurveType, PipelineSettings};
    pub use crate::util::{Error, Result, Vec2, Vec3};
    pub use std::path::Path;
    pub use std::sync::Arc;
}
