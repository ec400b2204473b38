use crate::error::Result;
use crate::layers::param::Parameter;
use crate::network::module::Trainable;
use crate::optim::clip::clip_grad_norm;
use crate::optim::optimizer::Optimizer;

/// A network together with the optimizer that exclusively updates it.
pub struct TrainableUnit<M> {
    pub net: M,
    pub optimizer: Box<dyn Optimizer>,
}

impl<M: Trainable> TrainableUnit<M> {
    pub fn new(net: M, optimizer: Box<dyn Optimizer>) -> Self {
        TrainableUnit { net, optimizer }
    }

    /// Clips this unit's gradients to `max_norm` and applies one optimizer
    /// update. Returns the pre-clip gradient norm.
    pub fn clip_and_step(&mut self, max_norm: f64) -> Result<f64> {
        let mut params: Vec<&mut Parameter> = self.net.parameters_mut();
        let norm = clip_grad_norm(&mut params, max_norm);
        self.optimizer.step(&mut params)?;
        Ok(norm)
    }
}
