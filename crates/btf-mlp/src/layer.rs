//! Dense int8 layer.

use crate::{check_scale, MlpError, HIDDEN_DIM, QMAX};

/// Symmetric int8 quantization with clamping. Non-finite input maps to 0.
#[inline]
pub fn quantize(x: f32, scale: f32) -> i8 {
    if !x.is_finite() {
        return 0;
    }
    (x / scale).round().clamp(-(QMAX as f32), QMAX as f32) as i8
}

/// Dense layer with int8 weights and f32 bias.
///
/// Weights are row-major by output: `weights[o * in_dim + i]`.
#[derive(Debug, Clone)]
pub struct QuantizedLayer {
    in_dim: usize,
    out_dim: usize,
    weight_scale: f32,
    input_scale: f32,
    weights: Vec<i8>,
    bias: Vec<f32>,
}

impl QuantizedLayer {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        weight_scale: f32,
        input_scale: f32,
        weights: Vec<i8>,
        bias: Vec<f32>,
    ) -> Result<Self, MlpError> {
        check_scale("weight scale", weight_scale)?;
        check_scale("input scale", input_scale)?;
        if in_dim > HIDDEN_DIM || out_dim > HIDDEN_DIM {
            return Err(MlpError::LayerShape {
                layer: usize::MAX,
                expected: (HIDDEN_DIM, HIDDEN_DIM),
                actual: (in_dim, out_dim),
            });
        }
        if weights.len() != in_dim * out_dim {
            return Err(MlpError::WeightCount {
                layer: usize::MAX,
                expected: in_dim * out_dim,
                actual: weights.len(),
            });
        }
        if bias.len() != out_dim {
            return Err(MlpError::BiasCount {
                layer: usize::MAX,
                expected: out_dim,
                actual: bias.len(),
            });
        }
        Ok(Self {
            in_dim,
            out_dim,
            weight_scale,
            input_scale,
            weights,
            bias,
        })
    }

    /// Quantize float weights with a per-layer scale of `max|w| / 127`.
    pub fn from_f32(
        in_dim: usize,
        out_dim: usize,
        weights: &[f32],
        bias: Vec<f32>,
        input_scale: f32,
    ) -> Result<Self, MlpError> {
        let max_abs = weights.iter().fold(0.0f32, |m, w| m.max(w.abs()));
        let weight_scale = if max_abs > 0.0 { max_abs / QMAX as f32 } else { 1.0 };
        let q = weights.iter().map(|&w| quantize(w, weight_scale)).collect();
        Self::new(in_dim, out_dim, weight_scale, input_scale, q, bias)
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn weight_scale(&self) -> f32 {
        self.weight_scale
    }

    pub fn input_scale(&self) -> f32 {
        self.input_scale
    }

    pub fn weights(&self) -> &[i8] {
        &self.weights
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// `out = W · q(input) · (input_scale · weight_scale) + bias`, no activation.
    pub fn forward(&self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.in_dim);
        debug_assert_eq!(out.len(), self.out_dim);

        let mut q = [0i8; HIDDEN_DIM];
        for (qi, &x) in q.iter_mut().zip(input) {
            *qi = quantize(x, self.input_scale);
        }
        let q = &q[..self.in_dim];
        let rescale = self.input_scale * self.weight_scale;

        for (o, (row, b)) in out
            .iter_mut()
            .zip(self.weights.chunks_exact(self.in_dim).zip(&self.bias))
        {
            let acc: i32 = row
                .iter()
                .zip(q)
                .map(|(&w, &x)| w as i32 * x as i32)
                .sum();
            *o = acc as f32 * rescale + b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_clamps() {
        assert_eq!(quantize(10.0, 0.01), 127);
        assert_eq!(quantize(-10.0, 0.01), -127);
        assert_eq!(quantize(f32::NAN, 0.01), 0);
        assert_eq!(quantize(0.5, 0.01), 50);
    }

    #[test]
    fn test_forward_matches_float_reference() {
        let w = [0.5f32, -0.25, 0.125, 1.0, 0.0, -1.0];
        let layer = QuantizedLayer::from_f32(3, 2, &w, vec![0.1, -0.2], 1.0 / 127.0).unwrap();
        let input = [0.4f32, -0.6, 0.9];
        let mut out = [0.0f32; 2];
        layer.forward(&input, &mut out);

        let expected = [
            0.5 * 0.4 + -0.25 * -0.6 + 0.125 * 0.9 + 0.1,
            1.0 * 0.4 + 0.0 * -0.6 + -1.0 * 0.9 - 0.2,
        ];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 0.02, "{o} vs {e}");
        }
    }

    #[test]
    fn test_rejects_bad_scale() {
        let err = QuantizedLayer::new(1, 1, 0.0, 1.0, vec![1], vec![0.0]).unwrap_err();
        assert!(matches!(err, MlpError::InvalidScale { .. }));
    }

    #[test]
    fn test_rejects_weight_count() {
        let err = QuantizedLayer::new(2, 2, 1.0, 1.0, vec![1; 3], vec![0.0; 2]).unwrap_err();
        assert!(matches!(err, MlpError::WeightCount { expected: 4, actual: 3, .. }));
    }
}
