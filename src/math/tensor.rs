use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{Error, Result};

/// Dense row-major tensor of `f64` values.
///
/// Images, masks and logits are `[N, C, H, W]`; critic scores are `[N, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Per-pixel integer class ids, `[N, H, W]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub labels: Vec<usize>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor { shape: shape.to_vec(), data: vec![0.0; shape.iter().product()] }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::shape_mismatch(&[expected], &[data.len()]));
        }
        Ok(Tensor { shape: shape.to_vec(), data })
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    pub fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // Both uniforms on (0, 1] so ln() stays finite.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// Tensor filled with N(0, std_dev^2) samples.
    pub fn randn<R: Rng + ?Sized>(shape: &[usize], std_dev: f64, rng: &mut R) -> Tensor {
        let len = shape.iter().product();
        let data = (0..len).map(|_| Tensor::sample_standard_normal(rng) * std_dev).collect();
        Tensor { shape: shape.to_vec(), data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Interprets the tensor as `[N, C, H, W]`.
    pub fn dims4(&self) -> Result<(usize, usize, usize, usize)> {
        match self.shape.as_slice() {
            &[n, c, h, w] => Ok((n, c, h, w)),
            other => Err(Error::shape_mismatch(&[0, 0, 0, 0], other)),
        }
    }

    pub fn reshape(self, shape: &[usize]) -> Result<Tensor> {
        Tensor::from_vec(shape, self.data)
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f64) -> f64,
    {
        Tensor { shape: self.shape.clone(), data: self.data.iter().map(|&x| functor(x)).collect() }
    }

    pub fn zip_map<F>(&self, other: &Tensor, functor: F) -> Result<Tensor>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.ensure_same_shape(other)?;
        let data = self.data.iter().zip(other.data.iter()).map(|(&a, &b)| functor(a, b)).collect();
        Ok(Tensor { shape: self.shape.clone(), data })
    }

    pub fn add_assign(&mut self, other: &Tensor) -> Result<()> {
        self.ensure_same_shape(other)?;
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn ensure_same_shape(&self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch(&self.shape, &other.shape));
        }
        Ok(())
    }

    /// Hard per-pixel class assignment: argmax over the channel axis.
    /// Ties resolve to the lowest channel index.
    pub fn argmax_channels(&self) -> Result<LabelMap> {
        let (n, c, h, w) = self.dims4()?;
        let plane = h * w;
        let mut labels = Vec::with_capacity(n * plane);
        for b in 0..n {
            let base = b * c * plane;
            for p in 0..plane {
                let mut best = 0;
                let mut best_val = f64::NEG_INFINITY;
                for ch in 0..c {
                    let v = self.data[base + ch * plane + p];
                    if v > best_val {
                        best = ch;
                        best_val = v;
                    }
                }
                labels.push(best);
            }
        }
        Ok(LabelMap { batch: n, height: h, width: w, labels })
    }
}

impl LabelMap {
    pub fn new(batch: usize, height: usize, width: usize, labels: Vec<usize>) -> Result<LabelMap> {
        if labels.len() != batch * height * width {
            return Err(Error::shape_mismatch(&[batch, height, width], &[labels.len()]));
        }
        Ok(LabelMap { batch, height, width, labels })
    }

    pub fn pixels_per_sample(&self) -> usize {
        self.height * self.width
    }

    /// Labels of sample `index`, row-major.
    pub fn sample(&self, index: usize) -> &[usize] {
        let plane = self.pixels_per_sample();
        &self.labels[index * plane..(index + 1) * plane]
    }

    /// Expands to a one-hot `[N, num_classes, H, W]` mask.
    pub fn one_hot(&self, num_classes: usize) -> Result<Tensor> {
        let plane = self.pixels_per_sample();
        let mut out = Tensor::zeros(&[self.batch, num_classes, self.height, self.width]);
        for (i, &label) in self.labels.iter().enumerate() {
            if label >= num_classes {
                return Err(Error::LabelOutOfRange { label, num_classes });
            }
            let (b, p) = (i / plane, i % plane);
            out.data[b * num_classes * plane + label * plane + p] = 1.0;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Tensor::from_vec(&[2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn argmax_picks_highest_channel_per_pixel() {
        // N=1, C=3, H=1, W=2
        let t = Tensor::from_vec(&[1, 3, 1, 2], vec![0.1, 0.9, 0.5, 0.2, 0.3, 0.0]).unwrap();
        let labels = t.argmax_channels().unwrap();
        assert_eq!(labels.labels, vec![2, 0]);
    }

    #[test]
    fn one_hot_then_argmax_recovers_labels() {
        let labels = LabelMap::new(2, 1, 2, vec![0, 2, 1, 1]).unwrap();
        let mask = labels.one_hot(3).unwrap();
        assert_eq!(mask.argmax_channels().unwrap(), labels);
    }

    #[test]
    fn one_hot_rejects_out_of_range_label() {
        let labels = LabelMap::new(1, 1, 1, vec![5]).unwrap();
        assert!(matches!(labels.one_hot(3), Err(Error::LabelOutOfRange { label: 5, .. })));
    }

    #[test]
    fn randn_is_reproducible_for_a_seed() {
        let a = Tensor::randn(&[4], 1.0, &mut StdRng::seed_from_u64(7));
        let b = Tensor::randn(&[4], 1.0, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
