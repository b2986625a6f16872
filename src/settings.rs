//! Pipeline control surface, persisted as JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::quantize::ScaleLayout;
use crate::util::Result;

/// Response curve applied last in the display transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveType {
    #[default]
    Linear,
    Reinhard,
    AcesFilm,
    /// Piecewise linear through `custom_curve`
    Custom,
}

/// Numeric knobs consumed by compositing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlParams {
    pub exposure: f32,
    /// Contrast about mid-grey (0.18)
    pub contrast: f32,
    /// Height-field overlay weight; 1 shows the overlay only
    pub overlay_mix: f32,
    pub black_level: f32,
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            contrast: 1.0,
            overlay_mix: 1.0,
            black_level: 0.0,
        }
    }
}

/// Everything a host can tune between frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    // Model
    /// Catalog name; empty selects the first entry
    pub model: String,
    pub scale_layout: ScaleLayout,

    // Toggles
    pub apply_synthesis: bool,
    pub show_traced_hf: bool,
    pub traced_shadow_ray: bool,
    pub jitter: bool,

    // Compositing
    pub control: ControlParams,
    pub curve: CurveType,
    /// Output values of the custom curve at inputs 0, 0.25, 0.5, 0.75, 1
    pub custom_curve: [f32; 5],

    // Lighting
    /// Euler degrees
    pub env_rotation: [f32; 3],

    // Height-field march
    pub hf_scale: f32,
    pub hf_steps: u32,

    // Diagnostics
    pub timing_enabled: bool,
    pub timing_window: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            scale_layout: ScaleLayout::GroupPairs,
            apply_synthesis: true,
            show_traced_hf: false,
            traced_shadow_ray: true,
            jitter: false,
            control: ControlParams::default(),
            curve: CurveType::Linear,
            custom_curve: [0.0, 0.25, 0.5, 0.75, 1.0],
            env_rotation: [0.0; 3],
            hf_scale: 0.05,
            hf_steps: 16,
            timing_enabled: true,
            timing_window: 64,
        }
    }
}

impl PipelineSettings {
    /// `<config_dir>/neural-btf/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("neural-btf");
            p.push("settings.json");
            p
        })
    }

    /// Read from `path`; values out of range are pulled back into range.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        Ok(settings.sanitized())
    }

    /// Like [`load`](Self::load) but falls back to defaults on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "using default settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn sanitized(mut self) -> Self {
        self.hf_steps = self.hf_steps.max(1);
        self.timing_window = self.timing_window.max(1);
        if !self.hf_scale.is_finite() || self.hf_scale < 0.0 {
            self.hf_scale = 0.0;
        }
        let c = &mut self.control;
        if !c.exposure.is_finite() || c.exposure < 0.0 {
            c.exposure = 1.0;
        }
        if !c.contrast.is_finite() || c.contrast <= 0.0 {
            c.contrast = 1.0;
        }
        c.overlay_mix = if c.overlay_mix.is_finite() { c.overlay_mix.clamp(0.0, 1.0) } else { 1.0 };
        if !c.black_level.is_finite() {
            c.black_level = 0.0;
        }
        for v in &mut self.custom_curve {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        self
    }
}
