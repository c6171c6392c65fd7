//! Worker-group reduction seam.

use crate::common::*;

/// Element-wise sum reduction across all workers of a run.
///
/// Implementations must be associative and commutative, and safe to call
/// once per worker per epoch regardless of worker count.
pub trait Collective {
    fn sum_f64(&self, values: &mut [f64]) -> Result<()>;
}

/// Single-process collective. Summing over one worker leaves the values
/// untouched.
#[derive(Debug, Clone, Copy)]
pub struct LocalCollective;

impl Collective for LocalCollective {
    fn sum_f64(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }
}
