//! The training program for the crop classification pipeline.

pub mod checkpoint;
pub mod common;
pub mod config;

use crate::{
    common::*,
    config::{Config, ScheduleConfig},
};
use classify_dl::{
    backward::{BackwardStep, ClippedBackward, FullPrecision},
    data::{normalization, BatchLoaderInit, CropDataset},
    ema::{NoShadow, ShadowWeights, WeightEma},
    engine::{evaluate, train_one_epoch, EvalContext, EvalStats, RunDir, TrainContext, FILE_STRFTIME},
    logging::{StepLogger, TensorBoardLogger},
    loss::CrossEntropyLoss,
    mix::{BatchMix, MixUpInit, NoMix},
    model::{Classifier, ScriptModel},
    optim::{GroupedAdam, GroupedAdamInit},
    sync::LocalCollective,
};

/// The entry of the training program.
pub fn start(config: Arc<Config>) -> Result<()> {
    let start_time = Local::now();
    let run_dir = config
        .logging
        .dir
        .join(format!("{}", start_time.format(FILE_STRFTIME)));
    let checkpoint_dir = run_dir.join("checkpoints");
    let results_dir = run_dir.join("results");

    // create dirs and save config
    {
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create '{}'", run_dir.display()))?;
        fs::create_dir_all(&checkpoint_dir)
            .with_context(|| format!("failed to create '{}'", checkpoint_dir.display()))?;
        let path = run_dir.join("config.json5");
        let text = serde_json::to_string_pretty(&*config)?;
        fs::write(&path, text)?;
    }

    // load datasets
    info!("loading dataset");
    let train_set = CropDataset::scan(&config.dataset.train_dir)?;
    let val_set = config
        .dataset
        .val_dir
        .as_ref()
        .map(CropDataset::scan)
        .transpose()?;
    info!(
        "{} training records, {} validation records",
        train_set.len(),
        val_set.as_ref().map(CropDataset::len).unwrap_or(0)
    );

    let device = config.training.device;
    let batch_size = config.dataset.batch_size.get();
    let update_freq = config.training.update_freq.get();
    let epochs = config.training.epochs.get();
    let input_size = config.model.input_size.get() as u32;
    let num_classes = config.model.num_classes.get() as i64;
    let (mean, std) = normalization(config.dataset.imagenet_default_mean_and_std);
    let class_ids: Vec<i64> = (0..num_classes).collect();

    // init model and optimizer
    info!("initializing model");
    let mut vs = nn::VarStore::new(device);
    let mut model = ScriptModel::load(&config.model.script_file, vs.root())?;
    let mut optimizer = GroupedAdam::new(
        &vs,
        GroupedAdamInit {
            momentum: config.training.momentum.raw(),
            weight_decay: config.training.weight_decay.raw(),
            lr_scales: config
                .training
                .lr_scales
                .iter()
                .map(|scale| scale.raw())
                .collect(),
        },
    )?;

    // load checkpoint
    checkpoint::try_load_checkpoint(
        &mut vs,
        &config.logging.dir,
        &config.training.load_checkpoint,
    )?;

    // build schedule tables
    let steps_per_epoch = match config.training.num_training_steps_per_epoch {
        Some(steps) => steps.get(),
        None => (train_set.len() / (batch_size * update_freq)).max(1),
    };
    let lr_table = config
        .training
        .lr_schedule
        .build_table(epochs, steps_per_epoch)?;
    let wd_table = config
        .training
        .wd_schedule
        .as_ref()
        .map(|schedule: &ScheduleConfig| schedule.build_table(epochs, steps_per_epoch))
        .transpose()?;

    // collaborators
    let criterion = CrossEntropyLoss::new(Reduction::Mean);
    let mut backward: Box<dyn BackwardStep> = match config.training.max_norm {
        Some(max_norm) => Box::new(ClippedBackward::new(&vs, Some(max_norm.raw()))?),
        None => Box::new(FullPrecision),
    };
    let mut mix: Box<dyn BatchMix> = match &config.training.mixup {
        Some(mixup) => Box::new(
            MixUpInit {
                alpha: mixup.alpha.raw(),
                prob: mixup.prob.raw(),
                label_smoothing: mixup.label_smoothing.raw(),
                num_classes,
            }
            .build()?,
        ),
        None => Box::new(NoMix),
    };
    let mut no_shadow = NoShadow;
    let mut ema = config
        .model
        .ema_decay
        .map(|decay| WeightEma::new(&vs, decay.raw()))
        .transpose()?;
    let mut loggers: Vec<Box<dyn StepLogger>> = if config.logging.enable_tensorboard {
        vec![Box::new(TensorBoardLogger::create(
            &run_dir.join("events"),
            "classify-dl",
        )?)]
    } else {
        vec![]
    };

    // training
    info!("start training");
    let mut last_loss = f64::NAN;
    for epoch in 0..epochs {
        let train_loader = BatchLoaderInit {
            batch_size,
            input_size,
            mean,
            std,
            shuffle: true,
            drop_last: true,
            keep_paths: false,
            device,
        }
        .build(&train_set, config.dataset.crop.to_cropper_init().build())?;

        let shadow: &mut dyn ShadowWeights = match ema.as_mut() {
            Some(ema) => ema,
            None => &mut no_shadow,
        };
        let train_stats = train_one_epoch(
            TrainContext {
                model: &mut model,
                criterion: &criterion,
                optimizer: &mut optimizer,
                backward: backward.as_mut(),
                mix: mix.as_mut(),
                shadow,
                loggers: &mut loggers,
                comm: &LocalCollective,
                lr_table: &lr_table,
                wd_table: wd_table.as_ref(),
                update_freq,
                num_training_steps_per_epoch: steps_per_epoch,
                start_step: epoch * steps_per_epoch,
            },
            epoch,
            train_loader,
        )?;

        if let Some(val_set) = &val_set {
            run_validation(
                &config,
                &mut model,
                val_set,
                &results_dir,
                &class_ids,
                input_size,
                mean,
                std,
                device,
            )?;
        }

        last_loss = train_stats.get("loss").copied().unwrap_or(last_loss);

        // save checkpoint
        if let Some(0) = config
            .training
            .save_checkpoint_epochs
            .map(|cadence| (epoch + 1) % cadence.get())
        {
            checkpoint::save_checkpoint(&vs, &checkpoint_dir, epoch, last_loss)?;
        }
    }

    // final evaluation with the averaged weights
    if let (Some(ema), Some(val_set)) = (&ema, &val_set) {
        info!("evaluating averaged weights");
        ema.apply()?;
        run_validation(
            &config,
            &mut model,
            val_set,
            &results_dir,
            &class_ids,
            input_size,
            mean,
            std,
            device,
        )?;
        checkpoint::save_checkpoint(&vs, &checkpoint_dir, epochs, last_loss)?;
    }

    Ok(())
}

fn run_validation(
    config: &Config,
    model: &mut dyn Classifier,
    val_set: &CropDataset,
    results_dir: &Path,
    class_ids: &[i64],
    input_size: u32,
    mean: [f64; 3],
    std: [f64; 3],
    device: Device,
) -> Result<EvalStats> {
    let run_dir = RunDir::create(results_dir, &Local::now())?;
    let val_loader = BatchLoaderInit {
        batch_size: config.dataset.batch_size.get(),
        input_size,
        mean,
        std,
        shuffle: false,
        drop_last: false,
        keep_paths: true,
        device,
    }
    .build(val_set, config.dataset.crop.to_cropper_init().build())?;

    let stats = evaluate(
        EvalContext {
            model,
            comm: &LocalCollective,
            run_dir: &run_dir,
            class_ids,
        },
        val_loader,
    )?;

    for (class_id, class_accuracy) in &stats.per_class {
        info!(
            "class {}: acc1 {:.3} acc5 {:.3}",
            class_id, class_accuracy.acc1, class_accuracy.acc5
        );
    }
    Ok(stats)
}
