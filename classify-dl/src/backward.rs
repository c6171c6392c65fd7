//! Backpropagation seam, with optional gradient clipping and norm tracking.

use crate::common::*;

/// Backpropagates an already-scaled loss.
///
/// `update_grad` marks the micro-step whose accumulated gradients are about
/// to be applied by the optimizer; gradient clipping and norm measurement
/// happen only then. The returned value is the pre-clip gradient norm when
/// the implementation measures one.
pub trait BackwardStep {
    fn backward(&mut self, loss: &Tensor, update_grad: bool) -> Result<Option<f64>>;
}

/// Plain full-precision backward pass. No norm statistic is produced.
#[derive(Debug, Clone, Copy)]
pub struct FullPrecision;

impl BackwardStep for FullPrecision {
    fn backward(&mut self, loss: &Tensor, _update_grad: bool) -> Result<Option<f64>> {
        loss.backward();
        Ok(None)
    }
}

/// Backward pass that measures the total gradient norm on update boundaries
/// and rescales gradients exceeding the configured max norm.
pub struct ClippedBackward {
    max_norm: Option<f64>,
    variables: Vec<Tensor>,
}

impl ClippedBackward {
    pub fn new(vs: &nn::VarStore, max_norm: Option<f64>) -> Result<Self> {
        if let Some(max_norm) = max_norm {
            ensure!(max_norm > 0.0, "max_norm must be positive");
        }
        Ok(Self {
            max_norm,
            variables: vs.trainable_variables(),
        })
    }

    fn grad_norm(&self) -> f64 {
        let squared: f64 = self
            .variables
            .iter()
            .filter_map(|variable| {
                let grad = variable.grad();
                grad.defined().then(|| {
                    let norm = f64::from(&grad.norm());
                    norm * norm
                })
            })
            .sum();
        squared.sqrt()
    }
}

impl Debug for ClippedBackward {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClippedBackward")
            .field("max_norm", &self.max_norm)
            .field("num_variables", &self.variables.len())
            .finish()
    }
}

impl BackwardStep for ClippedBackward {
    fn backward(&mut self, loss: &Tensor, update_grad: bool) -> Result<Option<f64>> {
        loss.backward();
        if !update_grad {
            return Ok(None);
        }

        let total_norm = self.grad_norm();
        if let Some(max_norm) = self.max_norm {
            let coef = max_norm / (total_norm + 1e-6);
            if coef < 1.0 {
                tch::no_grad(|| {
                    for variable in &self.variables {
                        let mut grad = variable.grad();
                        if grad.defined() {
                            let rescaled = &grad * coef;
                            grad.copy_(&rescaled);
                        }
                    }
                });
            }
        }
        Ok(Some(total_norm))
    }
}
