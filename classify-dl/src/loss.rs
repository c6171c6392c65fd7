//! Loss functions and accuracy statistics.

use crate::common::*;

/// A scalar loss over a batch of logits and targets.
pub trait Criterion {
    fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor;
}

/// Cross entropy over logits, accepting either sparse class-index targets
/// (one-dimensional int64) or dense soft-label targets (two-dimensional
/// float, e.g. from batch mixing).
#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
}

impl CrossEntropyLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }
}

impl Criterion for CrossEntropyLoss {
    fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        // assume [batch_size, n_classes] input shape
        let (batch_size, _num_classes) = input.size2().unwrap();

        let loss = if target.dim() == 1 {
            debug_assert!(
                target.kind() == Kind::Int64 && target.size1().unwrap() == batch_size,
                "expect target a [{}] int64 tensor",
                batch_size
            );
            input.cross_entropy_for_logits(target)
        } else {
            debug_assert!(target.size2().unwrap() == input.size2().unwrap());
            (-target * input.log_softmax(-1, Kind::Float)).sum_dim_intlist(
                &[-1],
                false,
                Kind::Float,
            )
        };

        match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.sum(Kind::Float),
            Reduction::Mean => loss.mean(Kind::Float),
            Reduction::Other(_) => unimplemented!(),
        }
    }
}

/// Top-k accuracy in percent for each requested k. A k larger than the
/// class count is clamped so that small label spaces remain measurable.
pub fn accuracy(output: &Tensor, target: &Tensor, topk: &[i64]) -> Result<Vec<f64>> {
    let (batch_size, num_classes) = output.size2()?;
    ensure!(batch_size > 0, "accuracy over an empty batch is undefined");

    let max_k = topk
        .iter()
        .copied()
        .max()
        .ok_or_else(|| format_err!("topk must not be empty"))?
        .min(num_classes);

    let (_scores, pred) = output.topk(max_k, 1, true, true);
    let correct = pred.eq_tensor(&target.unsqueeze(1));

    let accuracies = topk
        .iter()
        .map(|&k| {
            let k = k.min(num_classes);
            let num_correct =
                f64::from(&correct.narrow(1, 0, k).to_kind(Kind::Float).sum(Kind::Float));
            num_correct * 100.0 / batch_size as f64
        })
        .collect();
    Ok(accuracies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sparse_cross_entropy_matches_manual_value() {
        let input = Tensor::of_slice(&[2.0f32, 0.0, 0.0, 2.0]).view([2, 2]);
        let target = Tensor::of_slice(&[0i64, 1]);
        let loss = CrossEntropyLoss::new(Reduction::Mean).forward(&input, &target);

        // -log(e^2 / (e^2 + e^0)) for both rows
        let expected = -(2.0f64.exp() / (2.0f64.exp() + 1.0)).ln();
        assert_abs_diff_eq!(f64::from(&loss), expected, epsilon = 1e-6);
    }

    #[test]
    fn soft_targets_match_sparse_when_one_hot() {
        let input = Tensor::of_slice(&[1.5f32, -0.5, 0.25, 2.0, 0.0, -1.0]).view([2, 3]);
        let sparse = Tensor::of_slice(&[2i64, 0]);
        let soft = sparse.one_hot(3).to_kind(Kind::Float);

        let criterion = CrossEntropyLoss::new(Reduction::Mean);
        let sparse_loss = f64::from(&criterion.forward(&input, &sparse));
        let soft_loss = f64::from(&criterion.forward(&input, &soft));
        assert_abs_diff_eq!(sparse_loss, soft_loss, epsilon = 1e-6);
    }

    #[test]
    fn topk_accuracy_counts_hits() -> Result<()> {
        let output = Tensor::of_slice(&[
            0.9f32, 0.1, 0.0, // predicts 0
            0.1, 0.8, 0.1, // predicts 1
            0.7, 0.2, 0.1, // predicts 0, target 1 in top-2
        ])
        .view([3, 3]);
        let target = Tensor::of_slice(&[0i64, 1, 1]);

        let accs = accuracy(&output, &target, &[1, 2])?;
        assert_abs_diff_eq!(accs[0], 200.0 / 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(accs[1], 100.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn topk_is_clamped_to_class_count() -> Result<()> {
        let output = Tensor::of_slice(&[0.9f32, 0.1, 0.2, 0.8]).view([2, 2]);
        let target = Tensor::of_slice(&[0i64, 1]);

        let accs = accuracy(&output, &target, &[1, 5])?;
        assert_abs_diff_eq!(accs[1], 100.0, epsilon = 1e-6);
        Ok(())
    }
}
