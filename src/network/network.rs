use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::error::Result;
use crate::layers::dense::Dense;
use crate::layers::param::Parameter;
use crate::math::tensor::Tensor;
use crate::network::module::{Mode, Segmenter, Trainable};

/// Per-pixel segmentation network: a stack of pointwise dense layers mapping
/// `[N, C_in, H, W]` inputs to `[N, num_classes, H, W]` logits.
#[derive(Debug, Clone)]
pub struct PixelNet {
    pub layers: Vec<Dense>,
    mode: Mode,
}

impl PixelNet {
    /// Builds the network from the input channel count, hidden widths and the
    /// number of output classes. Hidden layers use `hidden_activation`; the
    /// output layer is linear (logits).
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        hidden: &[usize],
        num_classes: usize,
        hidden_activation: ActivationFunction,
        rng: &mut R,
    ) -> PixelNet {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut width = in_channels;
        for (i, &size) in hidden.iter().enumerate() {
            layers.push(Dense::new(&format!("layers.{i}"), width, size, hidden_activation, rng));
            width = size;
        }
        layers.push(Dense::new(
            &format!("layers.{}", hidden.len()),
            width,
            num_classes,
            ActivationFunction::Identity,
            rng,
        ));
        PixelNet { layers, mode: Mode::Train }
    }
}

impl Trainable for PixelNet {
    fn parameters(&self) -> Vec<&Parameter> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}

impl Segmenter for PixelNet {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mode = self.mode;
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.forward(&current, mode)?;
        }
        Ok(current)
    }

    fn backward(&mut self, grad_logits: &Tensor) -> Result<()> {
        let mut delta = grad_logits.clone();
        for layer in self.layers.iter_mut().rev() {
            delta = layer.backward(&delta)?;
        }
        Ok(())
    }

    fn num_classes(&self) -> usize {
        self.layers.last().map_or(0, |l| l.out_channels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn net(seed: u64) -> PixelNet {
        let mut rng = StdRng::seed_from_u64(seed);
        PixelNet::new(3, &[4], 2, ActivationFunction::LeakyReLU { alpha: 0.01 }, &mut rng)
    }

    #[test]
    fn output_has_one_channel_per_class() {
        let mut g = net(1);
        let y = g.forward(&Tensor::zeros(&[2, 3, 4, 4])).unwrap();
        assert_eq!(y.shape(), &[2, 2, 4, 4]);
        assert_eq!(g.num_classes(), 2);
    }

    #[test]
    fn state_dict_round_trip_reproduces_outputs() {
        let mut a = net(1);
        let mut b = net(2);
        let x = Tensor::randn(&[1, 3, 2, 2], 1.0, &mut StdRng::seed_from_u64(9));
        b.load_state_dict(&a.state_dict()).unwrap();
        assert_eq!(a.forward(&x).unwrap(), b.forward(&x).unwrap());
    }

    #[test]
    fn failed_load_leaves_parameters_untouched() {
        let mut a = net(1);
        let before = a.state_dict();
        let mut broken = net(2).state_dict();
        broken.remove("layers.1.bias");
        assert!(a.load_state_dict(&broken).is_err());
        assert_eq!(a.state_dict(), before);
    }
}
