//! Inference program configuration format.

use crate::common::*;
use classify_dl::crop::CropperInit;

/// The main inference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The TorchScript model file.
    pub script_file: PathBuf,
    /// The root directory of annotated images to classify.
    pub data_dir: PathBuf,
    /// The square input size fed to the model.
    pub input_size: NonZeroUsize,
    /// Use the ImageNet default mean/std instead of the Inception variant.
    #[serde(default = "default_true")]
    pub imagenet_default_mean_and_std: bool,
    #[serde(default)]
    pub crop: CropConfig,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    /// If set, predicted-positive/negative files are copied under this root.
    pub partition_dir: Option<PathBuf>,
    /// If set, confidence plots are written with this file prefix.
    pub report_prefix: Option<String>,
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

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses() -> Result<()> {
        let text = r#"
        {
            script_file: "model.pt",
            data_dir: "data/crops",
            input_size: 224,
            crop: { use_bbox: true, padding: true, padding_size: 8 },
            device: "cpu",
            partition_dir: "results/partition",
            report_prefix: "results/report_",
        }
        "#;
        let config: Config = json5::from_str(text)?;

        assert_eq!(config.input_size.get(), 224);
        assert!(config.imagenet_default_mean_and_std);
        assert_eq!(config.crop.padding_size, 8);
        assert!(config.report_prefix.is_some());
        Ok(())
    }

    #[test]
    fn crop_defaults_apply_when_absent() -> Result<()> {
        let text = r#"
        {
            script_file: "model.pt",
            data_dir: "data/crops",
            input_size: 224,
            device: "cpu",
        }
        "#;
        let config: Config = json5::from_str(text)?;

        assert!(config.crop.use_bbox);
        assert!(!config.crop.padding);
        assert!(config.partition_dir.is_none());
        Ok(())
    }
}
