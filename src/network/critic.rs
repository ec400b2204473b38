use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::dense::Dense;
use crate::layers::param::Parameter;
use crate::math::tensor::Tensor;
use crate::network::module::{Critic, Mode, Trainable};

const LEAK: f64 = 0.2;

/// Conditional critic: separate pointwise branches embed the image and the
/// mask, both are global-average-pooled, concatenated and scored by a linear
/// head producing one logit per sample.
#[derive(Debug, Clone)]
pub struct ConditionalCritic {
    pub image_branch: Dense,
    pub mask_branch: Dense,
    pub head: Dense,
    mode: Mode,
    pooled_plane: Option<(usize, usize, usize)>, // (n, h, w) of the last training forward
}

impl ConditionalCritic {
    pub fn new<R: Rng + ?Sized>(image_channels: usize, num_classes: usize, features: usize, rng: &mut R) -> Self {
        let act = ActivationFunction::LeakyReLU { alpha: LEAK };
        ConditionalCritic {
            image_branch: Dense::new("image_branch", image_channels, features, act, rng),
            mask_branch: Dense::new("mask_branch", num_classes, features, act, rng),
            head: Dense::new("head", 2 * features, 1, ActivationFunction::Identity, rng),
            mode: Mode::Train,
            pooled_plane: None,
        }
    }

    fn features(&self) -> usize {
        self.image_branch.out_channels()
    }
}

/// Mean over H and W: `[N, C, H, W]` → `[N, C]` (flat, row-major).
fn global_average_pool(t: &Tensor) -> Result<Vec<f64>> {
    let (n, c, h, w) = t.dims4()?;
    let plane = h * w;
    Ok((0..n * c)
        .map(|i| t.data()[i * plane..(i + 1) * plane].iter().sum::<f64>() / plane as f64)
        .collect())
}

impl Trainable for ConditionalCritic {
    fn parameters(&self) -> Vec<&Parameter> {
        [&self.image_branch, &self.mask_branch, &self.head]
            .into_iter()
            .flat_map(|l| l.params())
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let ConditionalCritic { image_branch, mask_branch, head, .. } = self;
        [image_branch, mask_branch, head]
            .into_iter()
            .flat_map(|l| l.params_mut())
            .collect()
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}

impl Critic for ConditionalCritic {
    fn forward(&mut self, images: &Tensor, masks: &Tensor) -> Result<Tensor> {
        let (n, _, h, w) = images.dims4()?;
        let (mn, _, mh, mw) = masks.dims4()?;
        if (mn, mh, mw) != (n, h, w) {
            return Err(Error::shape_mismatch(&[n, 0, h, w], masks.shape()));
        }
        let mode = self.mode;
        let f = self.features();
        let img = global_average_pool(&self.image_branch.forward(images, mode)?)?;
        let msk = global_average_pool(&self.mask_branch.forward(masks, mode)?)?;

        let mut joined = Vec::with_capacity(n * 2 * f);
        for b in 0..n {
            joined.extend_from_slice(&img[b * f..(b + 1) * f]);
            joined.extend_from_slice(&msk[b * f..(b + 1) * f]);
        }
        let joined = Tensor::from_vec(&[n, 2 * f, 1, 1], joined)?;
        let scores = self.head.forward(&joined, mode)?;

        self.pooled_plane = match mode {
            Mode::Train => Some((n, h, w)),
            Mode::Eval => None,
        };
        scores.reshape(&[n, 1])
    }

    fn backward(&mut self, grad_scores: &Tensor) -> Result<Tensor> {
        let (n, h, w) = self.pooled_plane.ok_or(Error::NoForwardCache("conditional critic"))?;
        let f = self.features();
        let plane = h * w;
        let grad_joined = self.head.backward(&grad_scores.clone().reshape(&[n, 1, 1, 1])?)?;

        // Un-pool: each pixel receives 1/(H*W) of its channel's pooled gradient.
        let mut grad_img = Tensor::zeros(&[n, f, h, w]);
        let mut grad_msk = Tensor::zeros(&[n, f, h, w]);
        let gj = grad_joined.data();
        for b in 0..n {
            for c in 0..f {
                let gi = gj[b * 2 * f + c] / plane as f64;
                let gm = gj[b * 2 * f + f + c] / plane as f64;
                let base = (b * f + c) * plane;
                grad_img.data_mut()[base..base + plane].iter_mut().for_each(|v| *v = gi);
                grad_msk.data_mut()[base..base + plane].iter_mut().for_each(|v| *v = gm);
            }
        }
        self.image_branch.backward(&grad_img)?;
        self.mask_branch.backward(&grad_msk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn critic() -> ConditionalCritic {
        ConditionalCritic::new(3, 2, 4, &mut StdRng::seed_from_u64(11))
    }

    #[test]
    fn scores_have_one_logit_per_sample() {
        let mut d = critic();
        let s = d.forward(&Tensor::zeros(&[3, 3, 2, 2]), &Tensor::zeros(&[3, 2, 2, 2])).unwrap();
        assert_eq!(s.shape(), &[3, 1]);
    }

    #[test]
    fn mask_gradient_matches_finite_difference() {
        let mut d = critic();
        let mut rng = StdRng::seed_from_u64(5);
        let images = Tensor::randn(&[1, 3, 2, 2], 1.0, &mut rng);
        let mut masks = Tensor::randn(&[1, 2, 2, 2], 1.0, &mut rng);

        d.forward(&images, &masks).unwrap();
        let grad = d.backward(&Tensor::from_vec(&[1, 1], vec![1.0]).unwrap()).unwrap();

        let h = 1e-6;
        masks.data_mut()[3] += h;
        let plus = d.forward(&images, &masks).unwrap().sum();
        masks.data_mut()[3] -= 2.0 * h;
        let minus = d.forward(&images, &masks).unwrap().sum();
        assert_abs_diff_eq!(grad.data()[3], (plus - minus) / (2.0 * h), epsilon = 1e-5);
    }

    #[test]
    fn mismatched_mask_batch_is_rejected() {
        let mut d = critic();
        assert!(d.forward(&Tensor::zeros(&[2, 3, 2, 2]), &Tensor::zeros(&[1, 2, 2, 2])).is_err());
    }
}
