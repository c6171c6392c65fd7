//! Optimizer adaptor with schedulable parameter groups.

use crate::common::*;

/// Placeholder rate overwritten by the schedule before the first step.
const DUMMY_LR: f64 = 1.0;

/// One optimizer parameter group. The learning rate and weight decay are
/// rewritten by the training loop from the schedule tables; the rate scale
/// is fixed at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub lr_scale: f64,
}

/// The optimizer seam used by the training loop.
pub trait ScheduledOptimizer {
    fn groups(&self) -> &[ParamGroup];
    fn groups_mut(&mut self) -> &mut [ParamGroup];
    fn zero_grad(&mut self);
    /// Applies the group rates to the backend and performs one update.
    fn step(&mut self) -> Result<()>;
}

/// Adam options for [`GroupedAdam`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedAdamInit {
    pub momentum: f64,
    pub weight_decay: f64,
    /// One entry per parameter group, in variable-group order.
    pub lr_scales: Vec<f64>,
}

/// Adam over a `VarStore`, exposing its parameter groups to the schedule.
pub struct GroupedAdam {
    optimizer: nn::Optimizer<nn::Adam>,
    groups: Vec<ParamGroup>,
}

impl GroupedAdam {
    pub fn new(vs: &nn::VarStore, init: GroupedAdamInit) -> Result<Self> {
        let GroupedAdamInit {
            momentum,
            weight_decay,
            lr_scales,
        } = init;
        ensure!(!lr_scales.is_empty(), "at least one parameter group is required");
        ensure!(
            lr_scales.iter().all(|scale| *scale > 0.0),
            "lr_scale must be positive"
        );

        let mut optimizer = nn::Adam {
            beta1: momentum,
            beta2: 0.999,
            wd: weight_decay,
        }
        .build(vs, DUMMY_LR)?;
        optimizer.set_momentum(momentum);

        let groups = lr_scales
            .into_iter()
            .map(|lr_scale| ParamGroup {
                learning_rate: DUMMY_LR,
                weight_decay,
                lr_scale,
            })
            .collect();

        Ok(Self { optimizer, groups })
    }
}

impl Debug for GroupedAdam {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupedAdam")
            .field("groups", &self.groups)
            .finish()
    }
}

impl ScheduledOptimizer for GroupedAdam {
    fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn zero_grad(&mut self) {
        self.optimizer.zero_grad();
    }

    fn step(&mut self) -> Result<()> {
        if self.groups.len() == 1 {
            let group = &self.groups[0];
            self.optimizer.set_lr(group.learning_rate);
            self.optimizer.set_weight_decay(group.weight_decay);
        } else {
            for (index, group) in self.groups.iter().enumerate() {
                self.optimizer.set_lr_group(index, group.learning_rate);
                self.optimizer
                    .set_weight_decay_group(index, group.weight_decay);
            }
        }
        self.optimizer.step();
        Ok(())
    }
}
