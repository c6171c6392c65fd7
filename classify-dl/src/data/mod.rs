//! Batch types and the crop-list data source.

mod dataset;
mod loader;

pub use dataset::*;
pub use loader::*;

use crate::{bbox::BoxCxCyWH, common::*};

/// Sentinel ground-truth value meaning "unknown".
pub const UNKNOWN_TRUTH: i64 = -1;

/// One unit of work for the training and evaluation loops.
///
/// `paths` and `bboxes` are carried only when the consumer needs per-sample
/// provenance (evaluation artifacts); the training loop leaves them unset.
#[derive(Debug)]
pub struct Batch {
    pub images: Tensor,
    pub paths: Option<Vec<PathBuf>>,
    pub bboxes: Option<Vec<BoxCxCyWH>>,
    pub targets: Tensor,
}

impl Batch {
    pub fn batch_size(&self) -> i64 {
        self.images.size()[0]
    }

    pub fn to_device(self, device: Device) -> Self {
        let Self {
            images,
            paths,
            bboxes,
            targets,
        } = self;
        Self {
            images: images.to_device(device),
            paths,
            bboxes,
            targets: targets.to_device(device),
        }
    }
}
