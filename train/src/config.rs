//! Training program configuration format.

use crate::common::*;
use classify_dl::{
    crop::CropperInit,
    schedule::{CosineScheduleInit, ScheduleTable},
};

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

/// The model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The TorchScript model file.
    pub script_file: PathBuf,
    /// The square input size fed to the model.
    pub input_size: NonZeroUsize,
    pub num_classes: NonZeroUsize,
    /// If set, a shadow copy of the weights is averaged with this decay.
    pub ema_decay: Option<R64>,
}

/// Dataset options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub train_dir: PathBuf,
    pub val_dir: Option<PathBuf>,
    /// The batch size per micro-step.
    pub batch_size: NonZeroUsize,
    /// Use the ImageNet default mean/std instead of the Inception variant.
    #[serde(default = "default_true")]
    pub imagenet_default_mean_and_std: bool,
    #[serde(default)]
    pub crop: CropConfig,
}

/// Crop options applied before resizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropConfig {
    #[serde(default = "default_true")]
    pub use_bbox: bool,
    #[serde(default)]
    pub padding: bool,
    #[serde(default)]
    pub padding_size: i64,
    #[serde(default)]
    pub use_shift: bool,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            use_bbox: true,
            padding: false,
            padding_size: 0,
            use_shift: false,
        }
    }
}

impl CropConfig {
    pub fn to_cropper_init(&self) -> CropperInit {
        CropperInit {
            use_bbox: self.use_bbox,
            padding: self.padding,
            padding_size: self.padding_size,
            use_shift: self.use_shift,
        }
    }
}

/// The training options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: NonZeroUsize,
    /// The number of micro-steps accumulated per optimizer step.
    pub update_freq: NonZeroUsize,
    /// Learning rate scheduling strategy.
    pub lr_schedule: ScheduleConfig,
    /// Weight decay scheduling strategy.
    pub wd_schedule: Option<ScheduleConfig>,
    /// Per-parameter-group learning rate multipliers.
    #[serde(default = "default_lr_scales")]
    pub lr_scales: Vec<R64>,
    /// The momentum parameter for the optimizer.
    pub momentum: R64,
    /// The weight decay parameter for the optimizer.
    pub weight_decay: R64,
    /// If set, gradients are clipped to this max norm before each step.
    pub max_norm: Option<R64>,
    pub mixup: Option<MixupConfig>,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    /// Overrides the step budget derived from the dataset size.
    pub num_training_steps_per_epoch: Option<NonZeroUsize>,
    /// If set, a checkpoint file is saved per this number of epochs.
    pub save_checkpoint_epochs: Option<NonZeroUsize>,
    /// Checkpoint file loading method.
    pub load_checkpoint: LoadCheckpoint,
}

/// The schedule table construction strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScheduleConfig {
    /// Use a constant value.
    Constant { value: R64 },
    /// Use specific values at specified optimizer steps.
    StepWise { steps: Vec<(usize, R64)> },
    /// Linear warmup followed by cosine decay.
    Cosine {
        base_value: R64,
        final_value: R64,
        #[serde(default)]
        warmup_epochs: usize,
        #[serde(default = "default_r64_zero")]
        start_warmup_value: R64,
    },
}

impl ScheduleConfig {
    pub fn build_table(&self, epochs: usize, steps_per_epoch: usize) -> Result<ScheduleTable> {
        let table = match *self {
            Self::Constant { value } => {
                ScheduleTable::constant(value.raw(), epochs * steps_per_epoch)?
            }
            Self::StepWise { ref steps } => {
                let steps: Vec<_> = steps
                    .iter()
                    .map(|&(step, value)| (step, value.raw()))
                    .collect();
                ScheduleTable::step_wise(&steps, epochs * steps_per_epoch)?
            }
            Self::Cosine {
                base_value,
                final_value,
                warmup_epochs,
                start_warmup_value,
            } => ScheduleTable::cosine(CosineScheduleInit {
                base_value: base_value.raw(),
                final_value: final_value.raw(),
                epochs,
                steps_per_epoch,
                warmup_epochs,
                start_warmup_value: start_warmup_value.raw(),
            })?,
        };
        Ok(table)
    }
}

/// Batch mixing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixupConfig {
    pub alpha: R64,
    /// The probability to mix a batch.
    pub prob: R64,
    #[serde(default = "default_r64_zero")]
    pub label_smoothing: R64,
}

/// Checkpoint file loading method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoadCheckpoint {
    /// Disable checkpoint file loading.
    Disabled,
    /// Load the most recent checkpoint file.
    FromRecent,
    /// Load the checkpoint file at specified path.
    FromFile { file: PathBuf },
}

/// Data logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub enable_tensorboard: bool,
}

fn default_true() -> bool {
    true
}

fn default_lr_scales() -> Vec<R64> {
    vec![r64(1.0)]
}

fn default_r64_zero() -> R64 {
    r64(0.0)
}
