//! Shadow-weight maintenance after optimizer steps.

use crate::common::*;

/// Hook fired once after every optimizer step.
pub trait ShadowWeights {
    fn update(&mut self) -> Result<()>;
}

/// Default implementation for runs without weight averaging.
#[derive(Debug, Clone, Copy)]
pub struct NoShadow;

impl ShadowWeights for NoShadow {
    fn update(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Exponential moving average over the trainable variables of a model.
///
/// The shadow copy tracks `decay * shadow + (1 - decay) * weight` and can be
/// written back into the live variables for more stable inference.
pub struct WeightEma {
    decay: f64,
    pairs: Vec<(Tensor, Tensor)>,
}

impl WeightEma {
    pub fn new(vs: &nn::VarStore, decay: f64) -> Result<Self> {
        ensure!(
            (0.0..1.0).contains(&decay),
            "ema decay must lie in [0, 1), but got {}",
            decay
        );

        let pairs = tch::no_grad(|| {
            vs.trainable_variables()
                .into_iter()
                .map(|variable| {
                    let shadow = variable.detach().copy();
                    (shadow, variable)
                })
                .collect()
        });
        Ok(Self { decay, pairs })
    }

    /// Overwrites the live variables with the averaged weights.
    pub fn apply(&self) -> Result<()> {
        tch::no_grad(|| {
            for (shadow, variable) in &self.pairs {
                let mut variable = variable.shallow_clone();
                variable.copy_(shadow);
            }
        });
        Ok(())
    }
}

impl Debug for WeightEma {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightEma")
            .field("decay", &self.decay)
            .field("num_variables", &self.pairs.len())
            .finish()
    }
}

impl ShadowWeights for WeightEma {
    fn update(&mut self) -> Result<()> {
        tch::no_grad(|| {
            for (shadow, variable) in &mut self.pairs {
                let next = &*shadow * self.decay + variable.detach() * (1.0 - self.decay);
                shadow.copy_(&next);
            }
        });
        Ok(())
    }
}
