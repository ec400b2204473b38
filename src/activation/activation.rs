use serde::{Serialize, Deserialize};

/// Element-wise nonlinearities used by the pointwise layers and by the loss
/// assembly (tanh maps generator logits into the critic's input range).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    Identity,
    Sigmoid,
    ReLU,
    Tanh,
    LeakyReLU { alpha: f64 },
}

impl ActivationFunction {
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Identity => x,
            ActivationFunction::Sigmoid => sigmoid(x),
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { x } else { alpha * x },
        }
    }

    /// Derivative evaluated at the pre-activation value `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Identity => 1.0,
            ActivationFunction::Sigmoid => {
                let fx = sigmoid(x);
                fx * (1.0 - fx)
            }
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { 1.0 } else { *alpha },
        }
    }
}

/// Numerically stable logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn tanh_derivative_matches_finite_difference() {
        let act = ActivationFunction::Tanh;
        let x = 0.3;
        let h = 1e-6;
        let numeric = (act.function(x + h) - act.function(x - h)) / (2.0 * h);
        assert_abs_diff_eq!(act.derivative(x), numeric, epsilon = 1e-6);
    }

    #[test]
    fn sigmoid_is_stable_for_large_inputs() {
        assert_abs_diff_eq!(sigmoid(800.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sigmoid(-800.0), 0.0, epsilon = 1e-12);
        assert!(sigmoid(-800.0).is_finite());
    }

    #[test]
    fn leaky_relu_keeps_negative_slope() {
        let act = ActivationFunction::LeakyReLU { alpha: 0.01 };
        assert_abs_diff_eq!(act.function(-2.0), -0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(act.derivative(-2.0), 0.01, epsilon = 1e-12);
    }
}
