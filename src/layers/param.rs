use rand::Rng;

use crate::math::tensor::Tensor;

/// A trainable tensor together with its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: Tensor,
    pub grad: Tensor,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Tensor) -> Parameter {
        let grad = Tensor::zeros(value.shape());
        Parameter { name: name.into(), value, grad }
    }

    pub fn zeros(name: impl Into<String>, shape: &[usize]) -> Parameter {
        Parameter::new(name, Tensor::zeros(shape))
    }

    /// He initialization: N(0, 2 / fan_in). Use before ReLU-family layers.
    pub fn he<R: Rng + ?Sized>(name: impl Into<String>, shape: &[usize], fan_in: usize, rng: &mut R) -> Parameter {
        let std_dev = (2.0 / fan_in.max(1) as f64).sqrt();
        Parameter::new(name, Tensor::randn(shape, std_dev, rng))
    }

    /// Xavier (Glorot) initialization: N(0, 1 / fan_in). Use before
    /// Sigmoid/Tanh/Identity layers.
    pub fn xavier<R: Rng + ?Sized>(name: impl Into<String>, shape: &[usize], fan_in: usize, rng: &mut R) -> Parameter {
        let std_dev = (1.0 / fan_in.max(1) as f64).sqrt();
        Parameter::new(name, Tensor::randn(shape, std_dev, rng))
    }

    pub fn zero_grad(&mut self) {
        self.grad.data_mut().iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}
