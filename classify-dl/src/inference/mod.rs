//! Single-pass inference over annotated crop lists.

mod partition;
mod report;

pub use partition::*;
pub use report::*;

use crate::{
    common::*,
    crop::Cropper,
    data::{image_to_input_tensor, parse_truth_label, CropRecord},
    model::Classifier,
};

const PROGRESS_FREQ: usize = 100;

/// One classified sample, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub pred: i64,
    /// The raw maximum output value. No softmax is applied, so this is a
    /// confidence proxy rather than a calibrated probability.
    pub confidence: f64,
    /// Class id parsed from the file name, or [`crate::data::UNKNOWN_TRUTH`].
    pub truth: i64,
    pub path: PathBuf,
}

/// Collaborators and options of one inference pass.
pub struct InferenceContext<'a> {
    pub model: &'a mut dyn Classifier,
    pub cropper: &'a mut Cropper,
    pub input_size: u32,
    pub mean: [f64; 3],
    pub std: [f64; 3],
    pub device: Device,
}

/// Classifies every record with a batch-free forward pass, preserving the
/// input order of the crop list.
pub fn run_inference(
    ctx: InferenceContext<'_>,
    records: &[CropRecord],
) -> Result<Vec<PredictionRecord>> {
    let InferenceContext {
        model,
        cropper,
        input_size,
        mean,
        std,
        device,
    } = ctx;

    model.set_train_mode(false);
    let mut predictions = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let path = record.path();
        let image = image::open(&path)
            .with_context(|| format!("failed to read image '{}'", path.display()))?;
        let cropped = cropper.crop(&image, &record.bbox)?;

        let input = image_to_input_tensor(&cropped, input_size, mean, std)?
            .unsqueeze(0)
            .to_device(device);
        let output = tch::no_grad(|| model.forward_t(&input, false))?;

        let pred = i64::from(&output.argmax(-1, false).i(0));
        let confidence = f64::from(&output.max());

        let file_name = record
            .rel_path
            .file_name()
            .ok_or_else(|| format_err!("image path '{}' has no file name", path.display()))?
            .to_string_lossy()
            .into_owned();

        predictions.push(PredictionRecord {
            pred,
            confidence,
            truth: parse_truth_label(&file_name),
            path,
        });

        if (index + 1) % PROGRESS_FREQ == 0 {
            info!("classified {} / {} images", index + 1, records.len());
        }
    }

    info!("classified {} images", predictions.len());
    Ok(predictions)
}
