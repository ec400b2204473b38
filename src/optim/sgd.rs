use crate::error::{Error, Result};
use crate::layers::param::Parameter;
use crate::optim::optimizer::{Optimizer, OptimizerState};

/// Plain stochastic gradient descent: `θ ← θ - lr · g`.
pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()> {
        for p in params.iter_mut() {
            let Parameter { value, grad, .. } = &mut **p;
            for (v, g) in value.data_mut().iter_mut().zip(grad.data()) {
                *v -= self.learning_rate * g;
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Sgd { learning_rate: self.learning_rate }
    }

    fn load_state(&mut self, state: &OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Sgd { learning_rate } => {
                self.learning_rate = *learning_rate;
                Ok(())
            }
            other => Err(Error::OptimizerState(format!("expected sgd state, found {:?}", other.kind()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::tensor::Tensor;
    use approx::assert_abs_diff_eq;

    #[test]
    fn step_moves_against_gradient() {
        let mut p = Parameter::new("w", Tensor::from_vec(&[2], vec![1.0, -1.0]).unwrap());
        p.grad = Tensor::from_vec(&[2], vec![0.5, -0.5]).unwrap();
        Sgd::new(0.1).step(&mut [&mut p]).unwrap();
        assert_abs_diff_eq!(p.value.data()[0], 0.95, epsilon = 1e-12);
        assert_abs_diff_eq!(p.value.data()[1], -0.95, epsilon = 1e-12);
    }
}
