use crate::error::Result;
use crate::math::tensor::Tensor;

/// Binary cross-entropy on raw logits (sigmoid folded in), mean over elements.
pub struct BceWithLogitsLoss;

impl BceWithLogitsLoss {
    /// Returns `(loss, dL/d(logits))`.
    ///
    /// Per element: `max(x, 0) - x·y + ln(1 + e^{-|x|})`, which never
    /// overflows; the gradient is `(σ(x) - y) / n`.
    pub fn loss_and_grad(logits: &Tensor, targets: &Tensor) -> Result<(f64, Tensor)> {
        logits.ensure_same_shape(targets)?;
        let n = logits.len().max(1) as f64;
        let loss = logits
            .data()
            .iter()
            .zip(targets.data())
            .map(|(&x, &y)| x.max(0.0) - x * y + (-x.abs()).exp().ln_1p())
            .sum::<f64>()
            / n;
        let grad = logits.zip_map(targets, |x, y| (crate::activation::sigmoid(x) - y) / n)?;
        Ok((loss, grad))
    }
}
