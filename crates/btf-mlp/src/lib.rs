//! Neural BTF decoder
//!
//! Fixed-architecture int8 multilayer perceptron plus the per-material latent
//! grid it reads from. Shapes never depend on which material is loaded; only
//! weight values and scales do.
//!
//! ## Architecture
//! ```text
//! latent(uv) [8] ┐
//!                ├─ 16 → 32 → 32 → 32 → 3   (ReLU hidden, sigmoid output)
//! features   [8] ┘
//! ```
//!
//! Every layer quantizes its input with its own activation scale, accumulates
//! int8 × int8 products in i32 and rescales by `input_scale * weight_scale`.
//!
//! ## Usage
//!
//! ```ignore
//! use btf_mlp::{Mlp, LatentGrid, INPUT_DIM};
//!
//! let latent = grid.fetch(uv[0], uv[1]);
//! let mut input = [0.0f32; INPUT_DIM];
//! input[..8].copy_from_slice(&latent);
//! input[8..].copy_from_slice(&features);
//! let rgb = mlp.forward(&input);
//! ```

mod latent;
mod layer;

pub use latent::LatentGrid;
pub use layer::{quantize, QuantizedLayer};

use thiserror::Error;

/// Packed feature channels produced per shading point.
pub const FEATURE_CHANNELS: usize = 8;
/// Channels stored per latent texel.
pub const LATENT_CHANNELS: usize = 8;
/// Network input width (latent + features).
pub const INPUT_DIM: usize = LATENT_CHANNELS + FEATURE_CHANNELS;
/// Width of every hidden layer.
pub const HIDDEN_DIM: usize = 32;
/// RGB reflectance.
pub const OUTPUT_DIM: usize = 3;
/// Number of dense layers.
pub const LAYER_COUNT: usize = 4;
/// Largest magnitude of a symmetric int8 code.
pub const QMAX: i32 = 127;

/// `(in, out)` for each layer, in evaluation order.
pub const LAYER_SHAPES: [(usize, usize); LAYER_COUNT] = [
    (INPUT_DIM, HIDDEN_DIM),
    (HIDDEN_DIM, HIDDEN_DIM),
    (HIDDEN_DIM, HIDDEN_DIM),
    (HIDDEN_DIM, OUTPUT_DIM),
];

/// Shape or parameter violation while assembling a network.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MlpError {
    #[error("expected {expected} layers, got {actual}")]
    LayerCount { expected: usize, actual: usize },

    #[error("layer {layer}: expected shape {expected:?}, got {actual:?}")]
    LayerShape {
        layer: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("layer {layer}: expected {expected} weights, got {actual}")]
    WeightCount { layer: usize, expected: usize, actual: usize },

    #[error("layer {layer}: expected {expected} biases, got {actual}")]
    BiasCount { layer: usize, expected: usize, actual: usize },

    #[error("{what} must be finite and positive, got {value}")]
    InvalidScale { what: &'static str, value: f32 },

    #[error("latent grid: expected {expected} values, got {actual}")]
    LatentSize { expected: usize, actual: usize },

    #[error("latent grid resolution must be non-zero")]
    EmptyLatent,
}

pub(crate) fn check_scale(what: &'static str, value: f32) -> Result<(), MlpError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(MlpError::InvalidScale { what, value })
    }
}

/// The four-layer decoder.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<QuantizedLayer>,
}

impl Mlp {
    /// Assemble a network, rejecting anything that deviates from [`LAYER_SHAPES`].
    pub fn new(layers: Vec<QuantizedLayer>) -> Result<Self, MlpError> {
        if layers.len() != LAYER_COUNT {
            return Err(MlpError::LayerCount {
                expected: LAYER_COUNT,
                actual: layers.len(),
            });
        }
        for (i, (layer, &expected)) in layers.iter().zip(LAYER_SHAPES.iter()).enumerate() {
            let actual = (layer.in_dim(), layer.out_dim());
            if actual != expected {
                return Err(MlpError::LayerShape { layer: i, expected, actual });
            }
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[QuantizedLayer] {
        &self.layers
    }

    /// Evaluate one input vector. Output is normalized reflectance in [0, 1].
    pub fn forward(&self, input: &[f32; INPUT_DIM]) -> [f32; OUTPUT_DIM] {
        let mut a = [0.0f32; HIDDEN_DIM];
        let mut b = [0.0f32; HIDDEN_DIM];
        a[..INPUT_DIM].copy_from_slice(input);
        let mut width = INPUT_DIM;

        for (i, layer) in self.layers.iter().enumerate() {
            let out_dim = layer.out_dim();
            layer.forward(&a[..width], &mut b[..out_dim]);
            let last = i + 1 == self.layers.len();
            for v in &mut b[..out_dim] {
                *v = if last { sigmoid(*v) } else { v.max(0.0) };
            }
            std::mem::swap(&mut a, &mut b);
            width = out_dim;
        }

        [a[0], a[1], a[2]]
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(in_dim: usize, out_dim: usize, w: i8, bias: f32) -> QuantizedLayer {
        QuantizedLayer::new(
            in_dim,
            out_dim,
            1.0 / 127.0,
            1.0 / 127.0,
            vec![w; in_dim * out_dim],
            vec![bias; out_dim],
        )
        .unwrap()
    }

    fn network(bias: f32) -> Mlp {
        let layers = LAYER_SHAPES
            .iter()
            .map(|&(i, o)| layer(i, o, 0, bias))
            .collect();
        Mlp::new(layers).unwrap()
    }

    #[test]
    fn test_rejects_wrong_layer_count() {
        let err = Mlp::new(vec![layer(INPUT_DIM, HIDDEN_DIM, 1, 0.0)]).unwrap_err();
        assert_eq!(err, MlpError::LayerCount { expected: 4, actual: 1 });
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let mut layers: Vec<_> = LAYER_SHAPES.iter().map(|&(i, o)| layer(i, o, 1, 0.0)).collect();
        layers[2] = layer(HIDDEN_DIM, 16, 1, 0.0);
        assert!(matches!(
            Mlp::new(layers),
            Err(MlpError::LayerShape { layer: 2, .. })
        ));
    }

    #[test]
    fn test_zero_weights_output_is_sigmoid_of_bias() {
        let mlp = network(0.0);
        let out = mlp.forward(&[0.3; INPUT_DIM]);
        for v in out {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_output_in_unit_range() {
        let mlp = network(50.0);
        let out = mlp.forward(&[1.0; INPUT_DIM]);
        for v in out {
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
