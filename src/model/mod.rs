//! Neural material models.
//!
//! - [`catalog`]: the data-driven list of materials and their scales
//! - [`asset`]: `.nbtf` weights files
//! - [`registry`]: lazy loading, the active model, and deferred release of
//!   models still referenced by in-flight inference

pub mod asset;
pub mod catalog;
pub mod registry;

pub use asset::{AssetHeader, WeightsAsset};
pub use catalog::{Catalog, ModelInfo, CATALOG_VERSION};
pub use registry::{ModelRegistry, NeuralMaterialModel};
