use crate::layers::param::Parameter;

/// Clips gradients by their global L2 norm.
///
/// global_norm = sqrt(Σ ‖g‖²); if it exceeds `max_norm` every gradient is
/// scaled by `max_norm / global_norm`. Returns the norm measured before
/// clipping. Only the parameters passed in are touched.
pub fn clip_grad_norm(params: &mut [&mut Parameter], max_norm: f64) -> f64 {
    let total_norm_sq: f64 = params
        .iter()
        .map(|p| p.grad.data().iter().map(|g| g * g).sum::<f64>())
        .sum();
    let global_norm = total_norm_sq.sqrt();

    if global_norm > max_norm {
        let clip_coef = max_norm / global_norm;
        for p in params.iter_mut() {
            p.grad.data_mut().iter_mut().for_each(|g| *g *= clip_coef);
        }
    }
    global_norm
}
