//! Lazily loaded, reference-counted neural materials.

use std::sync::Arc;

use btf_mlp::{LatentGrid, Mlp, INPUT_DIM, LATENT_CHANNELS, OUTPUT_DIM};
use rayon::prelude::*;

use super::asset::{self, WeightsAsset};
use super::catalog::{Catalog, ModelInfo};
use crate::features::{feature_uv, OutputTexel, PackedFeature};
use crate::heightfield::HeightField;
use crate::quantize::{ScaleBuffer, ScaleLayout};
use crate::sync::{expect_len, CrossDomainSync, FenceToken};
use crate::util::{Error, Result};

/// One material's resident weights.
#[derive(Debug)]
pub struct NeuralMaterialModel {
    info: ModelInfo,
    mlp: Mlp,
    latent: LatentGrid,
    height_field: HeightField,
}

impl NeuralMaterialModel {
    pub fn new(info: ModelInfo, weights: WeightsAsset, height_field: HeightField) -> Self {
        Self {
            info,
            mlp: weights.mlp,
            latent: weights.latent,
            height_field,
        }
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn mlp(&self) -> &Mlp {
        &self.mlp
    }

    pub fn latent(&self) -> &LatentGrid {
        &self.latent
    }

    pub fn height_field(&self) -> &HeightField {
        &self.height_field
    }

    /// Decode one packed feature vector to normalized RGB reflectance.
    pub fn evaluate_one(&self, packed: &PackedFeature, scales: &ScaleBuffer) -> [f32; OUTPUT_DIM] {
        let features = scales.dequantize(packed);
        let uv = feature_uv(&scales.unpack_unit(packed));
        let latent = self.latent.fetch(uv.x, uv.y);
        let mut input = [0.0f32; INPUT_DIM];
        input[..LATENT_CHANNELS].copy_from_slice(&latent);
        input[LATENT_CHANNELS..].copy_from_slice(&features);
        self.mlp.forward(&input)
    }

    /// Batched evaluation. Pixels with `valid == 0` are written as zero.
    #[tracing::instrument(skip_all, fields(model = %self.info.name, pixels = packed.len()))]
    pub fn evaluate(
        &self,
        packed: &[PackedFeature],
        valid: &[u32],
        scales: &ScaleBuffer,
        out: &mut [OutputTexel],
    ) -> Result<()> {
        expect_len("valid", valid.len(), packed.len())?;
        expect_len("output", out.len(), packed.len())?;

        out.par_iter_mut()
            .zip(packed.par_iter().zip(valid.par_iter()))
            .for_each(|(o, (p, &v))| {
                *o = if v != 0 {
                    OutputTexel::from_rgb(self.evaluate_one(p, scales))
                } else {
                    OutputTexel::ZERO
                };
            });
        Ok(())
    }
}

/// Catalog metadata plus whichever models are resident.
pub struct ModelRegistry {
    catalog: Catalog,
    layout: ScaleLayout,
    resident: Vec<Option<Arc<NeuralMaterialModel>>>,
    active: Option<usize>,
    /// Unloaded models kept alive until the token of their last use is reached
    retired: Vec<(Arc<NeuralMaterialModel>, FenceToken)>,
}

impl ModelRegistry {
    pub fn new(catalog: Catalog, layout: ScaleLayout) -> Self {
        let n = catalog.len();
        Self {
            catalog,
            layout,
            resident: vec![None; n],
            active: None,
            retired: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn layout(&self) -> ScaleLayout {
        self.layout
    }

    /// Takes effect for the next [`scale_buffer`](Self::scale_buffer) call.
    pub fn set_layout(&mut self, layout: ScaleLayout) {
        self.layout = layout;
    }

    pub fn info(&self, index: usize) -> Result<&ModelInfo> {
        self.catalog
            .get(index)
            .ok_or_else(|| Error::UnknownModel(format!("#{index}")))
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.catalog
            .index_of(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn is_resident(&self, index: usize) -> bool {
        matches!(self.resident.get(index), Some(Some(_)))
    }

    /// Load weights and height field on first use. A failure leaves the
    /// registry untouched.
    pub fn load_network(&mut self, index: usize) -> Result<Arc<NeuralMaterialModel>> {
        if let Some(Some(model)) = self.resident.get(index) {
            return Ok(model.clone());
        }
        let info = self.info(index)?.clone();
        let _span = tracing::info_span!("load_network", model = %info.name).entered();

        // Scales must be usable under the current layout before anything is uploaded
        ScaleBuffer::new(info.scales, self.layout)?;

        let root = self.catalog.root();
        let weights = WeightsAsset::read(&asset::resolve(root, &info.asset)?)?;
        let height_field = HeightField::load(&root.join(&info.height_field))?;

        let model = Arc::new(NeuralMaterialModel::new(info, weights, height_field));
        self.resident[index] = Some(model.clone());
        tracing::info!(model = %model.info().name, "model loaded");
        Ok(model)
    }

    pub fn active(&self) -> Option<Arc<NeuralMaterialModel>> {
        self.active.and_then(|i| self.resident[i].clone())
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    /// Load if needed and make `index` the active model. On error the
    /// previous model stays active.
    ///
    /// Scales are re-checked under the current layout even when the model is
    /// already resident.
    pub fn activate(&mut self, index: usize) -> Result<Arc<NeuralMaterialModel>> {
        self.scale_buffer(index)?;
        let model = self.load_network(index)?;
        if self.active != Some(index) {
            tracing::info!(from = ?self.active.map(|i| &self.catalog.models()[i].name), to = %model.info().name, "model switched");
        }
        self.active = Some(index);
        Ok(model)
    }

    /// Unload a non-active model. Its memory is held until `token` is reached.
    pub fn retire(&mut self, index: usize, token: FenceToken) -> bool {
        if self.active == Some(index) {
            return false;
        }
        match self.resident.get_mut(index).and_then(Option::take) {
            Some(model) => {
                tracing::debug!(model = %model.info().name, %token, "model retired");
                self.retired.push((model, token));
                true
            }
            None => false,
        }
    }

    /// Drop retired models whose last use is certified complete.
    pub fn collect_retired(&mut self, sync: &CrossDomainSync) -> usize {
        let before = self.retired.len();
        self.retired.retain(|(_, token)| !sync.is_reached(*token));
        before - self.retired.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Scale buffer for `index` under the current layout.
    pub fn scale_buffer(&self, index: usize) -> Result<ScaleBuffer> {
        ScaleBuffer::new(self.info(index)?.scales, self.layout)
    }
}
