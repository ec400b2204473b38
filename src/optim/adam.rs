use crate::error::{Error, Result};
use crate::layers::param::Parameter;
use crate::optim::optimizer::{Optimizer, OptimizerState};

/// Adam with bias-corrected first and second moments.
///
/// m_t = β1·m + (1-β1)·g,  v_t = β2·v + (1-β2)·g²
/// θ_t = θ - lr · m̂_t / (√v̂_t + ε)
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: u64,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Adam { learning_rate, beta1, beta2, epsilon, t: 0, m: Vec::new(), v: Vec::new() }
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }

    /// Lazily sizes the moment buffers; a mismatch against restored buffers is
    /// an error rather than a silent reset.
    fn ensure_moments(&mut self, params: &[&mut Parameter]) -> Result<()> {
        if self.m.is_empty() {
            self.m = params.iter().map(|p| vec![0.0; p.len()]).collect();
            self.v = params.iter().map(|p| vec![0.0; p.len()]).collect();
            return Ok(());
        }
        if self.m.len() != params.len() {
            return Err(Error::OptimizerState(format!(
                "adam holds moments for {} parameters, got {}",
                self.m.len(),
                params.len()
            )));
        }
        for (i, p) in params.iter().enumerate() {
            if self.m[i].len() != p.len() {
                return Err(Error::OptimizerState(format!(
                    "moment buffer for `{}` has {} elements, parameter has {}",
                    p.name,
                    self.m[i].len(),
                    p.len()
                )));
            }
        }
        Ok(())
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()> {
        self.ensure_moments(params)?;
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);

        for (i, p) in params.iter_mut().enumerate() {
            let Parameter { value, grad, .. } = &mut **p;
            let (m, v) = (&mut self.m[i], &mut self.v[i]);
            for (j, (theta, &g)) in value.data_mut().iter_mut().zip(grad.data()).enumerate() {
                m[j] = self.beta1 * m[j] + (1.0 - self.beta1) * g;
                v[j] = self.beta2 * v[j] + (1.0 - self.beta2) * g * g;
                let m_hat = m[j] / bias1;
                let v_hat = v[j] / bias2;
                *theta -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Adam {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            step: self.t,
            first_moments: self.m.clone(),
            second_moments: self.v.clone(),
        }
    }

    fn load_state(&mut self, state: &OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Adam { learning_rate, beta1, beta2, epsilon, step, first_moments, second_moments } => {
                if first_moments.len() != second_moments.len() {
                    return Err(Error::OptimizerState("adam moment buffers disagree in length".into()));
                }
                self.learning_rate = *learning_rate;
                self.beta1 = *beta1;
                self.beta2 = *beta2;
                self.epsilon = *epsilon;
                self.t = *step;
                self.m = first_moments.clone();
                self.v = second_moments.clone();
                Ok(())
            }
            other => Err(Error::OptimizerState(format!("expected adam state, found {:?}", other.kind()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::tensor::Tensor;
    use approx::assert_abs_diff_eq;

    fn param(value: f64, grad: f64) -> Parameter {
        let mut p = Parameter::new("w", Tensor::from_vec(&[1], vec![value]).unwrap());
        p.grad = Tensor::from_vec(&[1], vec![grad]).unwrap();
        p
    }

    #[test]
    fn first_step_moves_by_learning_rate() {
        // with bias correction the first update is lr · sign(g)
        let mut p = param(1.0, 3.0);
        let mut adam = Adam::new(0.01, 0.5, 0.999, 1e-8);
        adam.step(&mut [&mut p]).unwrap();
        assert_abs_diff_eq!(p.value.data()[0], 0.99, epsilon = 1e-6);
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn restored_state_continues_identically() {
        let mut a = Adam::new(0.01, 0.5, 0.999, 1e-8);
        let mut pa = param(1.0, 0.3);
        a.step(&mut [&mut pa]).unwrap();

        let mut b = Adam::new(0.5, 0.9, 0.9, 1e-3);
        b.load_state(&a.state()).unwrap();
        let mut pb = pa.clone();

        a.step(&mut [&mut pa]).unwrap();
        b.step(&mut [&mut pb]).unwrap();
        assert_eq!(pa.value, pb.value);
    }

    #[test]
    fn sgd_state_is_rejected() {
        let mut adam = Adam::new(0.01, 0.5, 0.999, 1e-8);
        assert!(adam.load_state(&OptimizerState::Sgd { learning_rate: 0.1 }).is_err());
    }

    #[test]
    fn moment_count_mismatch_is_an_error() {
        let mut adam = Adam::new(0.01, 0.5, 0.999, 1e-8);
        let mut p1 = param(1.0, 1.0);
        adam.step(&mut [&mut p1]).unwrap();
        let mut p2 = param(1.0, 1.0);
        assert!(adam.step(&mut [&mut p1, &mut p2]).is_err());
    }
}
