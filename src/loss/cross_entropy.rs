use crate::error::{Error, Result};
use crate::math::tensor::{LabelMap, Tensor};

/// Multi-class cross-entropy between per-pixel logits and an integer label
/// map, averaged over every pixel of every sample.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Returns `(loss, dL/d(logits))` for logits `[N, C, H, W]` and labels
    /// `[N, H, W]`.
    ///
    /// Softmax and cross-entropy are fused, so the gradient per pixel is
    /// `softmax(z) - onehot(label)`, scaled by `1 / (N·H·W)`.
    pub fn loss_and_grad(logits: &Tensor, labels: &LabelMap) -> Result<(f64, Tensor)> {
        let (n, c, h, w) = logits.dims4()?;
        if (labels.batch, labels.height, labels.width) != (n, h, w) {
            return Err(Error::shape_mismatch(&[n, h, w], &[labels.batch, labels.height, labels.width]));
        }
        let plane = h * w;
        let pixels = (n * plane).max(1) as f64;
        let z = logits.data();
        let mut grad = Tensor::zeros(logits.shape());
        let g = grad.data_mut();
        let mut total = 0.0;

        for b in 0..n {
            let base = b * c * plane;
            for p in 0..plane {
                let label = labels.labels[b * plane + p];
                if label >= c {
                    return Err(Error::LabelOutOfRange { label, num_classes: c });
                }
                // log-sum-exp with max subtraction
                let max = (0..c).map(|k| z[base + k * plane + p]).fold(f64::NEG_INFINITY, f64::max);
                let sum_exp: f64 = (0..c).map(|k| (z[base + k * plane + p] - max).exp()).sum();
                let log_norm = max + sum_exp.ln();
                total += log_norm - z[base + label * plane + p];
                for k in 0..c {
                    let idx = base + k * plane + p;
                    let prob = (z[idx] - log_norm).exp();
                    let target = if k == label { 1.0 } else { 0.0 };
                    g[idx] = (prob - target) / pixels;
                }
            }
        }
        Ok((total / pixels, grad))
    }
}
