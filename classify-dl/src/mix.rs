//! Batch mixing applied before the forward pass.

use crate::common::*;
use rand_distr::{Beta, Distribution as _};

/// Optional label-mixing collaborator.
///
/// `None` means the batch was left untouched and per-batch accuracy remains
/// meaningful; `Some` carries mixed images together with soft targets.
pub trait BatchMix {
    fn mix(&mut self, images: &Tensor, targets: &Tensor) -> Result<Option<(Tensor, Tensor)>>;
}

/// Default implementation that never mixes.
#[derive(Debug, Clone, Copy)]
pub struct NoMix;

impl BatchMix for NoMix {
    fn mix(&mut self, _images: &Tensor, _targets: &Tensor) -> Result<Option<(Tensor, Tensor)>> {
        Ok(None)
    }
}

/// MixUp options.
#[derive(Debug, Clone, PartialEq)]
pub struct MixUpInit {
    pub alpha: f64,
    /// Probability of mixing a given batch.
    pub prob: f64,
    pub label_smoothing: f64,
    pub num_classes: i64,
}

/// Interpolates each batch with its reversed order, producing smoothed soft
/// targets.
pub struct MixUp {
    beta: Beta<f64>,
    prob: f64,
    label_smoothing: f64,
    num_classes: i64,
    rng: StdRng,
}

impl MixUpInit {
    pub fn build(self) -> Result<MixUp> {
        let Self {
            alpha,
            prob,
            label_smoothing,
            num_classes,
        } = self;
        ensure!(alpha > 0.0, "mixup alpha must be positive");
        ensure!((0.0..=1.0).contains(&prob), "mixup prob must lie in [0, 1]");
        ensure!(
            (0.0..1.0).contains(&label_smoothing),
            "label smoothing must lie in [0, 1)"
        );
        ensure!(num_classes > 0, "num_classes must be positive");

        let beta = Beta::new(alpha, alpha)
            .map_err(|err| format_err!("invalid mixup beta distribution: {}", err))?;
        Ok(MixUp {
            beta,
            prob,
            label_smoothing,
            num_classes,
            rng: StdRng::from_entropy(),
        })
    }
}

impl Debug for MixUp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixUp")
            .field("prob", &self.prob)
            .field("label_smoothing", &self.label_smoothing)
            .field("num_classes", &self.num_classes)
            .finish()
    }
}

impl MixUp {
    fn soft_targets(&self, targets: &Tensor) -> Tensor {
        let off_value = self.label_smoothing / self.num_classes as f64;
        let on_value = 1.0 - self.label_smoothing + off_value;
        targets.one_hot(self.num_classes).to_kind(Kind::Float) * (on_value - off_value) + off_value
    }
}

impl BatchMix for MixUp {
    fn mix(&mut self, images: &Tensor, targets: &Tensor) -> Result<Option<(Tensor, Tensor)>> {
        if self.rng.gen::<f64>() >= self.prob {
            return Ok(None);
        }

        let lam = self.beta.sample(&mut self.rng);
        let mixed_images = images * lam + images.flip(&[0]) * (1.0 - lam);
        let soft = self.soft_targets(targets);
        let mixed_targets = &soft * lam + soft.flip(&[0]) * (1.0 - lam);
        Ok(Some((mixed_images, mixed_targets)))
    }
}
