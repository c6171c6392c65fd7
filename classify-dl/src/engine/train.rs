use crate::{
    backward::BackwardStep,
    common::*,
    data::Batch,
    ema::ShadowWeights,
    logging::StepLogger,
    loss::Criterion,
    metrics::{MetricBook, DEFAULT_WINDOW_SIZE},
    mix::BatchMix,
    model::Classifier,
    optim::ScheduledOptimizer,
    schedule::ScheduleTable,
    sync::Collective,
};

const PRINT_FREQ: usize = 10;

/// Collaborators and options of one training epoch.
pub struct TrainContext<'a> {
    pub model: &'a mut dyn Classifier,
    pub criterion: &'a dyn Criterion,
    pub optimizer: &'a mut dyn ScheduledOptimizer,
    pub backward: &'a mut dyn BackwardStep,
    pub mix: &'a mut dyn BatchMix,
    pub shadow: &'a mut dyn ShadowWeights,
    pub loggers: &'a mut [Box<dyn StepLogger>],
    pub comm: &'a dyn Collective,
    pub lr_table: &'a ScheduleTable,
    pub wd_table: Option<&'a ScheduleTable>,
    /// Number of micro-steps accumulated per optimizer step.
    pub update_freq: usize,
    pub num_training_steps_per_epoch: usize,
    /// Global step offset of this epoch.
    pub start_step: usize,
}

/// Runs one training epoch over the batch source and returns the
/// synchronized global-average metrics.
pub fn train_one_epoch(
    ctx: TrainContext<'_>,
    epoch: usize,
    batches: impl Iterator<Item = Result<Batch>>,
) -> Result<IndexMap<String, f64>> {
    let TrainContext {
        model,
        criterion,
        optimizer,
        backward,
        mix,
        shadow,
        loggers,
        comm,
        lr_table,
        wd_table,
        update_freq,
        num_training_steps_per_epoch,
        start_step,
    } = ctx;
    ensure!(update_freq > 0, "update_freq must be positive");
    ensure!(
        num_training_steps_per_epoch > 0,
        "num_training_steps_per_epoch must be positive"
    );
    ensure!(
        !optimizer.groups().is_empty(),
        "optimizer must expose at least one parameter group"
    );

    model.set_train_mode(true);
    optimizer.zero_grad();
    let mut book = MetricBook::new(DEFAULT_WINDOW_SIZE);

    for (micro_step, batch) in batches.enumerate() {
        let batch = batch?;
        let step = micro_step / update_freq;
        if step >= num_training_steps_per_epoch {
            // drain the source without processing
            continue;
        }
        let global_step = start_step + step;

        // refresh learning rate and weight decay on accumulation boundaries
        if micro_step % update_freq == 0 {
            let lr_value = lr_table.value_at(global_step)?;
            let wd_value = wd_table
                .map(|table| table.value_at(global_step))
                .transpose()?;

            for group in optimizer.groups_mut() {
                group.learning_rate = lr_value * group.lr_scale;
                if let Some(wd_value) = wd_value {
                    if group.weight_decay > 0.0 {
                        group.weight_decay = wd_value;
                    }
                }
            }
        }

        let Batch {
            images, targets, ..
        } = batch;

        let mixed = mix.mix(&images, &targets)?;
        let (input, target) = match &mixed {
            Some((mixed_images, mixed_targets)) => (mixed_images, mixed_targets),
            None => (&images, &targets),
        };

        let output = model.forward_t(input, true)?;
        let loss = criterion.forward(&output, target);
        let loss_value = f64::from(&loss);
        ensure!(
            loss_value.is_finite(),
            "loss is {}, stopping training",
            loss_value
        );

        // average the accumulated gradients over the micro-batches
        let scaled_loss = loss / update_freq as f64;
        let update_grad = (micro_step + 1) % update_freq == 0;
        let grad_norm = backward.backward(&scaled_loss, update_grad)?;

        if update_grad {
            optimizer.step()?;
            optimizer.zero_grad();
            shadow.update()?;
        }

        // mixed labels are not directly comparable against class indexes
        let class_acc = match &mixed {
            Some(_) => None,
            None => Some(tch::no_grad(|| {
                f64::from(
                    &output
                        .argmax(-1, false)
                        .eq_tensor(&targets)
                        .to_kind(Kind::Float)
                        .mean(Kind::Float),
                )
            })),
        };

        let (min_lr, max_lr) = optimizer.groups().iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min_lr, max_lr), group| {
                (
                    min_lr.min(group.learning_rate),
                    max_lr.max(group.learning_rate),
                )
            },
        );
        let weight_decay_value = optimizer
            .groups()
            .iter()
            .filter(|group| group.weight_decay > 0.0)
            .map(|group| group.weight_decay)
            .last();

        book.update("loss", loss_value);
        if let Some(class_acc) = class_acc {
            book.update("class_acc", class_acc);
        }
        book.update("lr", max_lr);
        book.update("min_lr", min_lr);
        if let Some(weight_decay_value) = weight_decay_value {
            book.update("weight_decay", weight_decay_value);
        }
        if let Some(grad_norm) = grad_norm {
            book.update("grad_norm", grad_norm);
        }

        for logger in loggers.iter_mut() {
            logger.scalar("loss", "loss", loss_value)?;
            if let Some(class_acc) = class_acc {
                logger.scalar("loss", "class_acc", class_acc)?;
            }
            logger.scalar("opt", "lr", max_lr)?;
            logger.scalar("opt", "min_lr", min_lr)?;
            if let Some(weight_decay_value) = weight_decay_value {
                logger.scalar("opt", "weight_decay", weight_decay_value)?;
            }
            if let Some(grad_norm) = grad_norm {
                logger.scalar("opt", "grad_norm", grad_norm)?;
            }
            logger.advance()?;
        }

        if micro_step % PRINT_FREQ == 0 {
            info!("epoch: [{}]\tstep: {}\t{}", epoch, step, book);
        }
    }

    // gather the stats from all workers
    book.synchronize(comm)?;
    info!("epoch: [{}] averaged stats: {}", epoch, book);
    Ok(book.global_averages())
}
