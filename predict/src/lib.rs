//! The standalone inference program for the crop classification pipeline.

pub mod common;
pub mod config;

use crate::{common::*, config::Config};
use classify_dl::{
    data::{normalization, CropDataset, UNKNOWN_TRUTH},
    inference::{categorize, partition_predictions, run_inference, write_report, InferenceContext},
    model::FrozenModel,
};

/// The entry of the inference program.
pub fn start(config: Arc<Config>) -> Result<()> {
    let device = config.device;
    let (mean, std) = normalization(config.imagenet_default_mean_and_std);

    info!("loading dataset");
    let dataset = CropDataset::scan(&config.data_dir)?;
    info!("{} records found", dataset.len());

    info!("loading model");
    let mut model = FrozenModel::load(&config.script_file, device)?;
    let mut cropper = config.crop.to_cropper_init().build();

    let predictions = run_inference(
        InferenceContext {
            model: &mut model,
            cropper: &mut cropper,
            input_size: config.input_size.get() as u32,
            mean,
            std,
            device,
        },
        dataset.records(),
    )?;

    let num_known = predictions
        .iter()
        .filter(|record| record.truth != UNKNOWN_TRUTH)
        .count();
    let num_positive = predictions
        .iter()
        .filter(|record| record.pred != 0)
        .count();
    info!(
        "{} predictions, {} with known ground truth, {} predicted positive",
        predictions.len(),
        num_known,
        num_positive
    );

    if let Some(partition_dir) = &config.partition_dir {
        partition_predictions(&predictions, partition_dir)?;
    }

    if let Some(report_prefix) = &config.report_prefix {
        let split = categorize(&predictions);
        for series in &split.series {
            info!("{}: {} records", series.label, series.len());
        }
        write_report(&split, &predictions, report_prefix)?;
    }

    Ok(())
}
