use super::RunDir;
use crate::{
    common::*,
    data::Batch,
    loss::{accuracy, Criterion, CrossEntropyLoss},
    metrics::{Meter, MetricBook, DEFAULT_WINDOW_SIZE},
    model::Classifier,
    sync::Collective,
    vis,
};

/// Synchronized accuracy of a single class over an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassAccuracy {
    pub acc1: f64,
    pub acc5: f64,
}

/// The outcome of one evaluation run.
#[derive(Debug, Clone)]
pub struct EvalStats {
    pub metrics: IndexMap<String, f64>,
    /// Accuracy per class id. Classes without samples have no entry.
    pub per_class: IndexMap<i64, ClassAccuracy>,
}

/// Collaborators and options of one evaluation run.
pub struct EvalContext<'a> {
    pub model: &'a mut dyn Classifier,
    pub comm: &'a dyn Collective,
    pub run_dir: &'a RunDir,
    /// The known class ids, identical on every worker.
    pub class_ids: &'a [i64],
}

struct ClassMeters {
    acc1: Meter,
    acc5: Meter,
}

/// Runs the validation batch source to exhaustion without gradient
/// tracking, writing one annotated image per sample into the run directory.
pub fn evaluate(
    ctx: EvalContext<'_>,
    batches: impl Iterator<Item = Result<Batch>>,
) -> Result<EvalStats> {
    let EvalContext {
        model,
        comm,
        run_dir,
        class_ids,
    } = ctx;

    let criterion = CrossEntropyLoss::new(Reduction::Mean);
    let mut book = MetricBook::new(DEFAULT_WINDOW_SIZE);
    let mut per_class: IndexMap<i64, ClassMeters> = class_ids
        .iter()
        .map(|&class_id| {
            (
                class_id,
                ClassMeters {
                    acc1: Meter::new(DEFAULT_WINDOW_SIZE),
                    acc5: Meter::new(DEFAULT_WINDOW_SIZE),
                },
            )
        })
        .collect();

    model.set_train_mode(false);

    for batch in batches {
        let Batch {
            images,
            paths,
            bboxes,
            targets,
        } = batch?;
        let paths = paths.ok_or_else(|| format_err!("evaluation batches must carry paths"))?;
        let bboxes =
            bboxes.ok_or_else(|| format_err!("evaluation batches must carry bounding boxes"))?;

        let (output, loss) = tch::no_grad(|| -> Result<_> {
            let output = model.forward_t(&images, false)?;
            let loss = criterion.forward(&output, &targets);
            Ok((output, loss))
        })?;

        let batch_size = targets.size1()?;
        let accs = accuracy(&output, &targets, &[1, 5])?;
        book.update("loss", f64::from(&loss));
        book.update_weighted("acc1", accs[0], batch_size as f64);
        book.update_weighted("acc5", accs[1], batch_size as f64);

        // annotated artifact per sample, binned by predicted class
        let pred = output.argmax(-1, false);
        for (index, (path, bbox)) in izip!(&paths, &bboxes).enumerate() {
            let truth = i64::from(&targets.i(index as i64));
            let predicted = i64::from(&pred.i(index as i64));

            let basename = path
                .file_name()
                .ok_or_else(|| format_err!("image path '{}' has no file name", path.display()))?
                .to_string_lossy();
            let dest = run_dir
                .dir_for_prediction(predicted)
                .join(format!("t{}_p{}_{}", truth, predicted, basename));
            vis::annotate_prediction(path, bbox, predicted == truth, &dest)?;
        }

        let (_batch_size, num_classes) = output.size2()?;
        for (&class_id, meters) in per_class.iter_mut() {
            let mask = targets.eq(class_id);
            let class_size = i64::from(&mask.sum(Kind::Int64));
            if class_size == 0 {
                continue;
            }

            let class_targets = targets.masked_select(&mask);
            let class_output = output
                .masked_select(&mask.unsqueeze(1).expand_as(&output))
                .view([-1, num_classes]);
            let class_accs = accuracy(&class_output, &class_targets, &[1, 5])?;
            meters.acc1.update_weighted(class_accs[0], class_size as f64);
            meters.acc5.update_weighted(class_accs[1], class_size as f64);
        }
    }

    // gather the stats from all workers
    book.synchronize(comm)?;
    synchronize_class_meters(&mut per_class, comm)?;

    let stats = EvalStats {
        metrics: book.global_averages(),
        per_class: per_class
            .iter()
            .filter_map(|(&class_id, meters)| {
                let acc1 = meters.acc1.global_avg()?;
                let acc5 = meters.acc5.global_avg()?;
                Some((class_id, ClassAccuracy { acc1, acc5 }))
            })
            .collect(),
    };

    info!(
        "* Acc@1 {:.3} Acc@5 {:.3} loss {:.3}",
        stats.metrics.get("acc1").copied().unwrap_or(f64::NAN),
        stats.metrics.get("acc5").copied().unwrap_or(f64::NAN),
        stats.metrics.get("loss").copied().unwrap_or(f64::NAN),
    );
    Ok(stats)
}

fn synchronize_class_meters(
    per_class: &mut IndexMap<i64, ClassMeters>,
    comm: &dyn Collective,
) -> Result<()> {
    // every worker holds the identical class id list, so the buffer layout
    // matches across the collective
    let mut buffer: Vec<f64> = per_class
        .values()
        .flat_map(|meters| {
            [
                meters.acc1.count(),
                meters.acc1.total(),
                meters.acc5.count(),
                meters.acc5.total(),
            ]
        })
        .collect();
    comm.sum_f64(&mut buffer)?;

    for (meters, chunk) in izip!(per_class.values_mut(), buffer.chunks_exact(4)) {
        meters.acc1.set_sums(chunk[0], chunk[1]);
        meters.acc5.set_sums(chunk[2], chunk[3]);
    }
    Ok(())
}
