use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::param::Parameter;
use crate::math::tensor::Tensor;
use crate::network::module::Mode;

/// Fully connected layer applied independently at every pixel of an
/// `[N, C_in, H, W]` tensor (a 1x1 convolution). With `H = W = 1` it is an
/// ordinary dense layer.
#[derive(Debug, Clone)]
pub struct Dense {
    pub weight: Parameter, // [out, in]
    pub bias: Parameter,   // [out]
    pub activator: ActivationFunction,
    cache: Option<DenseCache>,
}

#[derive(Debug, Clone)]
struct DenseCache {
    input: Tensor,
    // pre-activation z = Wx + b, needed for the activation derivative
    pre: Tensor,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        prefix: &str,
        in_channels: usize,
        out_channels: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Dense {
        let weight_name = format!("{prefix}.weight");
        let weight = match activation {
            ActivationFunction::ReLU | ActivationFunction::LeakyReLU { .. } => {
                Parameter::he(weight_name, &[out_channels, in_channels], in_channels, rng)
            }
            _ => Parameter::xavier(weight_name, &[out_channels, in_channels], in_channels, rng),
        };
        Dense {
            weight,
            bias: Parameter::zeros(format!("{prefix}.bias"), &[out_channels]),
            activator: activation,
            cache: None,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.value.shape()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.weight.value.shape()[0]
    }

    pub fn params(&self) -> [&Parameter; 2] {
        [&self.weight, &self.bias]
    }

    pub fn params_mut(&mut self) -> [&mut Parameter; 2] {
        [&mut self.weight, &mut self.bias]
    }

    /// Forward pass. Activations are cached for backprop only in `Mode::Train`.
    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let (n, c, h, w) = input.dims4()?;
        let (outs, ins) = (self.out_channels(), self.in_channels());
        if c != ins {
            return Err(Error::shape_mismatch(&[n, ins, h, w], input.shape()));
        }
        let plane = h * w;
        let x = input.data();
        let weights = self.weight.value.data();
        let biases = self.bias.value.data();

        let mut z = Tensor::zeros(&[n, outs, h, w]);
        let zd = z.data_mut();
        for b in 0..n {
            for o in 0..outs {
                let out_base = (b * outs + o) * plane;
                zd[out_base..out_base + plane].iter_mut().for_each(|v| *v = biases[o]);
                for i in 0..ins {
                    let wt = weights[o * ins + i];
                    let in_base = (b * ins + i) * plane;
                    for p in 0..plane {
                        zd[out_base + p] += wt * x[in_base + p];
                    }
                }
            }
        }

        let a = z.map(|v| self.activator.function(v));
        self.cache = match mode {
            Mode::Train => Some(DenseCache { input: input.clone(), pre: z }),
            Mode::Eval => None,
        };
        Ok(a)
    }

    /// Accumulates weight/bias gradients and returns dL/d(input).
    /// `grad_output` is dL/da for this layer's activations.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self.cache.as_ref().ok_or(Error::NoForwardCache("dense"))?;
        grad_output.ensure_same_shape(&cache.pre)?;
        let (n, _, h, w) = cache.input.dims4()?;
        let (outs, ins) = (self.out_channels(), self.in_channels());
        let plane = h * w;

        // δ = dL/da ⊙ σ'(z)
        let delta = cache.pre.zip_map(grad_output, |z, g| g * self.activator.derivative(z))?;
        let dd = delta.data();
        let x = cache.input.data();
        let weights = self.weight.value.data();

        let mut grad_input = Tensor::zeros(cache.input.shape());
        let gi = grad_input.data_mut();
        let wg = self.weight.grad.data_mut();
        let bg = self.bias.grad.data_mut();
        for b in 0..n {
            for o in 0..outs {
                let out_base = (b * outs + o) * plane;
                let d_slice = &dd[out_base..out_base + plane];
                bg[o] += d_slice.iter().sum::<f64>();
                for i in 0..ins {
                    let in_base = (b * ins + i) * plane;
                    let wt = weights[o * ins + i];
                    let mut acc = 0.0;
                    for p in 0..plane {
                        acc += d_slice[p] * x[in_base + p];
                        gi[in_base + p] += wt * d_slice[p];
                    }
                    wg[o * ins + i] += acc;
                }
            }
        }
        Ok(grad_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn layer() -> Dense {
        let mut rng = StdRng::seed_from_u64(3);
        Dense::new("l", 2, 3, ActivationFunction::Tanh, &mut rng)
    }

    #[test]
    fn forward_applies_same_weights_at_every_pixel() {
        let mut l = layer();
        // two pixels with identical channel vectors must produce identical outputs
        let x = Tensor::from_vec(&[1, 2, 1, 2], vec![0.5, 0.5, -1.0, -1.0]).unwrap();
        let y = l.forward(&x, Mode::Eval).unwrap();
        assert_eq!(y.shape(), &[1, 3, 1, 2]);
        for o in 0..3 {
            assert_abs_diff_eq!(y.data()[o * 2], y.data()[o * 2 + 1], epsilon = 1e-12);
        }
    }

    #[test]
    fn backward_without_training_forward_fails() {
        let mut l = layer();
        let x = Tensor::zeros(&[1, 2, 1, 1]);
        let y = l.forward(&x, Mode::Eval).unwrap();
        assert!(matches!(l.backward(&y), Err(Error::NoForwardCache(_))));
    }

    #[test]
    fn weight_gradient_matches_finite_difference() {
        let mut l = layer();
        let x = Tensor::from_vec(&[1, 2, 1, 2], vec![0.3, -0.7, 0.2, 0.9]).unwrap();
        // L = sum(a)
        let y = l.forward(&x, Mode::Train).unwrap();
        l.backward(&y.map(|_| 1.0)).unwrap();
        let analytic = l.weight.grad.data()[1];

        let h = 1e-6;
        l.weight.value.data_mut()[1] += h;
        let plus = l.forward(&x, Mode::Eval).unwrap().sum();
        l.weight.value.data_mut()[1] -= 2.0 * h;
        let minus = l.forward(&x, Mode::Eval).unwrap().sum();
        assert_abs_diff_eq!(analytic, (plus - minus) / (2.0 * h), epsilon = 1e-5);
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let mut l = layer();
        assert!(l.forward(&Tensor::zeros(&[1, 3, 1, 1]), Mode::Train).is_err());
    }
}
