//! The model adaptor.

use crate::common::*;
use tch::{CModule, TrainableCModule};

/// Stateful mapping from image batches to class-score vectors.
pub trait Classifier {
    fn forward_t(&mut self, input: &Tensor, train: bool) -> Result<Tensor>;
    fn set_train_mode(&mut self, train: bool);
}

/// A TorchScript model with trainable parameters registered in a
/// `VarStore`.
pub struct ScriptModel {
    module: TrainableCModule,
}

impl ScriptModel {
    pub fn load(script_file: impl AsRef<Path>, vs_root: nn::Path) -> Result<Self> {
        let script_file = script_file.as_ref();
        let module = TrainableCModule::load(script_file, vs_root)
            .with_context(|| format!("failed to load model '{}'", script_file.display()))?;
        Ok(Self { module })
    }
}

impl Debug for ScriptModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptModel").finish()
    }
}

impl Classifier for ScriptModel {
    fn forward_t(&mut self, input: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.module.forward_t(input, train))
    }

    fn set_train_mode(&mut self, train: bool) {
        if train {
            self.module.set_train();
        } else {
            self.module.set_eval();
        }
    }
}

/// A frozen TorchScript model for inference only.
pub struct FrozenModel {
    module: CModule,
}

impl FrozenModel {
    pub fn load(script_file: impl AsRef<Path>, device: Device) -> Result<Self> {
        let script_file = script_file.as_ref();
        let module = CModule::load_on_device(script_file, device)
            .with_context(|| format!("failed to load model '{}'", script_file.display()))?;
        Ok(Self { module })
    }
}

impl Debug for FrozenModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenModel").finish()
    }
}

impl Classifier for FrozenModel {
    fn forward_t(&mut self, input: &Tensor, _train: bool) -> Result<Tensor> {
        let output = self.module.forward_ts(&[input])?;
        Ok(output)
    }

    fn set_train_mode(&mut self, _train: bool) {}
}
