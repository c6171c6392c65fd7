use anyhow::Result;
use classify_dl::{
    backward::FullPrecision,
    bbox::BoxCxCyWH,
    crop::CropperInit,
    data::{
        normalization, Batch, BatchLoaderInit, CropDataset, UNKNOWN_TRUTH,
    },
    ema::ShadowWeights,
    engine::{evaluate, train_one_epoch, EvalContext, RunDir, TrainContext},
    inference::{run_inference, InferenceContext},
    logging::StepLogger,
    loss::{Criterion, CrossEntropyLoss},
    mix::NoMix,
    model::Classifier,
    optim::{ParamGroup, ScheduledOptimizer},
    schedule::ScheduleTable,
    sync::LocalCollective,
};
use image::RgbImage;
use std::{
    cell::{Cell, RefCell},
    fs,
    path::Path,
    rc::Rc,
};
use tch::{kind::FLOAT_CPU, nn, Device, Kind, Reduction, Tensor};

struct LinearModel {
    linear: nn::Linear,
}

impl LinearModel {
    fn new(vs: &nn::VarStore, in_dim: i64, out_dim: i64) -> Self {
        Self {
            linear: nn::linear(vs.root(), in_dim, out_dim, Default::default()),
        }
    }
}

impl Classifier for LinearModel {
    fn forward_t(&mut self, input: &Tensor, _train: bool) -> Result<Tensor> {
        Ok(input.apply(&self.linear))
    }

    fn set_train_mode(&mut self, _train: bool) {}
}

/// Always produces the same logits, favoring class 0.
struct ConstModel;

impl Classifier for ConstModel {
    fn forward_t(&mut self, input: &Tensor, _train: bool) -> Result<Tensor> {
        let batch_size = input.size()[0];
        Ok(Tensor::of_slice(&[2.0f32, 1.0])
            .unsqueeze(0)
            .repeat(&[batch_size, 1]))
    }

    fn set_train_mode(&mut self, _train: bool) {}
}

struct FakeOptimizer {
    groups: Vec<ParamGroup>,
    num_steps: usize,
}

impl FakeOptimizer {
    fn new(lr_scales: &[f64]) -> Self {
        Self {
            groups: lr_scales
                .iter()
                .map(|&lr_scale| ParamGroup {
                    learning_rate: 0.0,
                    weight_decay: 0.05,
                    lr_scale,
                })
                .collect(),
            num_steps: 0,
        }
    }
}

impl ScheduledOptimizer for FakeOptimizer {
    fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn zero_grad(&mut self) {}

    fn step(&mut self) -> Result<()> {
        self.num_steps += 1;
        Ok(())
    }
}

struct CountingShadow {
    num_updates: usize,
}

impl ShadowWeights for CountingShadow {
    fn update(&mut self) -> Result<()> {
        self.num_updates += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingLogger {
    scalars: Rc<RefCell<Vec<(String, String, f64)>>>,
    num_advances: Rc<Cell<usize>>,
}

impl StepLogger for RecordingLogger {
    fn scalar(&mut self, category: &str, name: &str, value: f64) -> Result<()> {
        self.scalars
            .borrow_mut()
            .push((category.to_owned(), name.to_owned(), value));
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        self.num_advances.set(self.num_advances.get() + 1);
        Ok(())
    }
}

struct NanCriterion;

impl Criterion for NanCriterion {
    fn forward(&self, _input: &Tensor, _target: &Tensor) -> Tensor {
        Tensor::of_slice(&[f32::NAN]).mean(Kind::Float)
    }
}

fn training_batches(count: usize, consumed: Rc<Cell<usize>>) -> impl Iterator<Item = Result<Batch>> {
    (0..count).map(move |_| {
        consumed.set(consumed.get() + 1);
        Ok(Batch {
            images: Tensor::rand(&[2, 4], FLOAT_CPU),
            paths: None,
            bboxes: None,
            targets: Tensor::of_slice(&[0i64, 1]),
        })
    })
}

#[test]
fn optimizer_steps_once_per_accumulation_window() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = LinearModel::new(&vs, 4, 2);
    let mut optimizer = FakeOptimizer::new(&[1.0, 0.5]);
    let mut shadow = CountingShadow { num_updates: 0 };
    let recorder = RecordingLogger::default();
    let mut loggers: Vec<Box<dyn StepLogger>> = vec![Box::new(recorder.clone())];
    let lr_table = ScheduleTable::constant(0.01, 100)?;
    let wd_table = ScheduleTable::constant(0.02, 100)?;

    let consumed = Rc::new(Cell::new(0));
    let stats = train_one_epoch(
        TrainContext {
            model: &mut model,
            criterion: &CrossEntropyLoss::new(Reduction::Mean),
            optimizer: &mut optimizer,
            backward: &mut FullPrecision,
            mix: &mut NoMix,
            shadow: &mut shadow,
            loggers: &mut loggers,
            comm: &LocalCollective,
            lr_table: &lr_table,
            wd_table: Some(&wd_table),
            update_freq: 3,
            num_training_steps_per_epoch: 100,
            start_step: 0,
        },
        0,
        training_batches(8, consumed.clone()),
    )?;

    // 8 micro-steps with freq 3 -> updates after micro-steps 3 and 6
    assert_eq!(optimizer.num_steps, 2);
    assert_eq!(shadow.num_updates, 2);
    assert_eq!(consumed.get(), 8);

    // scheduled rates carry the per-group scale
    assert!((optimizer.groups()[0].learning_rate - 0.01).abs() < 1e-12);
    assert!((optimizer.groups()[1].learning_rate - 0.005).abs() < 1e-12);
    assert!((optimizer.groups()[0].weight_decay - 0.02).abs() < 1e-12);

    assert!(stats.contains_key("loss"));
    assert!(stats.contains_key("class_acc"));
    assert!(stats.contains_key("lr"));
    assert!(stats.contains_key("min_lr"));
    assert!(stats.contains_key("weight_decay"));
    // full precision backward produces no norm statistic
    assert!(!stats.contains_key("grad_norm"));
    Ok(())
}

#[test]
fn nan_loss_aborts_before_any_optimizer_step() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = LinearModel::new(&vs, 4, 2);
    let mut optimizer = FakeOptimizer::new(&[1.0]);
    let mut shadow = CountingShadow { num_updates: 0 };
    let mut loggers: Vec<Box<dyn StepLogger>> = vec![];
    let lr_table = ScheduleTable::constant(0.01, 100)?;

    let consumed = Rc::new(Cell::new(0));
    let result = train_one_epoch(
        TrainContext {
            model: &mut model,
            criterion: &NanCriterion,
            optimizer: &mut optimizer,
            backward: &mut FullPrecision,
            mix: &mut NoMix,
            shadow: &mut shadow,
            loggers: &mut loggers,
            comm: &LocalCollective,
            lr_table: &lr_table,
            wd_table: None,
            update_freq: 1,
            num_training_steps_per_epoch: 100,
            start_step: 0,
        },
        0,
        training_batches(4, consumed.clone()),
    );

    let err = result.unwrap_err();
    assert!(err.to_string().contains("stopping training"));
    assert_eq!(optimizer.num_steps, 0);
    assert_eq!(shadow.num_updates, 0);
    // the loop stops at the offending batch
    assert_eq!(consumed.get(), 1);
    Ok(())
}

#[test]
fn extra_batches_beyond_epoch_budget_are_drained() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = LinearModel::new(&vs, 4, 2);
    let mut optimizer = FakeOptimizer::new(&[1.0]);
    let mut shadow = CountingShadow { num_updates: 0 };
    let mut loggers: Vec<Box<dyn StepLogger>> = vec![];
    let lr_table = ScheduleTable::constant(0.01, 2)?;

    let consumed = Rc::new(Cell::new(0));
    train_one_epoch(
        TrainContext {
            model: &mut model,
            criterion: &CrossEntropyLoss::new(Reduction::Mean),
            optimizer: &mut optimizer,
            backward: &mut FullPrecision,
            mix: &mut NoMix,
            shadow: &mut shadow,
            loggers: &mut loggers,
            comm: &LocalCollective,
            lr_table: &lr_table,
            wd_table: None,
            update_freq: 1,
            num_training_steps_per_epoch: 2,
            start_step: 0,
        },
        0,
        training_batches(5, consumed.clone()),
    )?;

    // the source is exhausted but only the declared steps are processed
    assert_eq!(consumed.get(), 5);
    assert_eq!(optimizer.num_steps, 2);
    Ok(())
}

#[test]
fn schedule_exhaustion_is_an_explicit_error() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = LinearModel::new(&vs, 4, 2);
    let mut optimizer = FakeOptimizer::new(&[1.0]);
    let mut shadow = CountingShadow { num_updates: 0 };
    let mut loggers: Vec<Box<dyn StepLogger>> = vec![];
    let lr_table = ScheduleTable::constant(0.01, 1)?;

    let consumed = Rc::new(Cell::new(0));
    let err = train_one_epoch(
        TrainContext {
            model: &mut model,
            criterion: &CrossEntropyLoss::new(Reduction::Mean),
            optimizer: &mut optimizer,
            backward: &mut FullPrecision,
            mix: &mut NoMix,
            shadow: &mut shadow,
            loggers: &mut loggers,
            comm: &LocalCollective,
            lr_table: &lr_table,
            wd_table: None,
            update_freq: 1,
            num_training_steps_per_epoch: 4,
            start_step: 0,
        },
        0,
        training_batches(4, consumed.clone()),
    )
    .unwrap_err();

    assert!(err.to_string().contains("out of schedule range"));
    Ok(())
}

#[test]
fn loggers_receive_tagged_scalars_and_step_boundaries() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = LinearModel::new(&vs, 4, 2);
    let mut optimizer = FakeOptimizer::new(&[1.0]);
    let mut shadow = CountingShadow { num_updates: 0 };
    let recorder = RecordingLogger::default();
    let mut loggers: Vec<Box<dyn StepLogger>> = vec![Box::new(recorder.clone())];
    let lr_table = ScheduleTable::constant(0.01, 100)?;

    let consumed = Rc::new(Cell::new(0));
    train_one_epoch(
        TrainContext {
            model: &mut model,
            criterion: &CrossEntropyLoss::new(Reduction::Mean),
            optimizer: &mut optimizer,
            backward: &mut FullPrecision,
            mix: &mut NoMix,
            shadow: &mut shadow,
            loggers: &mut loggers,
            comm: &LocalCollective,
            lr_table: &lr_table,
            wd_table: None,
            update_freq: 1,
            num_training_steps_per_epoch: 100,
            start_step: 0,
        },
        0,
        training_batches(3, consumed.clone()),
    )?;

    assert_eq!(recorder.num_advances.get(), 3);
    let scalars = recorder.scalars.borrow();
    assert!(scalars
        .iter()
        .any(|(category, name, _)| category == "loss" && name == "loss"));
    assert!(scalars
        .iter()
        .any(|(category, name, _)| category == "opt" && name == "lr"));
    Ok(())
}

fn write_labeled_image(dir: &Path, name: &str) -> Result<()> {
    RgbImage::new(16, 16).save(dir.join(name))?;
    fs::write(
        dir.join(Path::new(name).with_extension("txt")),
        "0 0.5 0.5 0.5 0.5\n",
    )?;
    Ok(())
}

#[test]
fn evaluation_skips_absent_classes_and_writes_artifacts() -> Result<()> {
    let data_dir = tempfile::tempdir()?;
    for index in 0..4 {
        write_labeled_image(data_dir.path(), &format!("t1_{:02}.png", index))?;
    }
    let dataset = CropDataset::scan(data_dir.path())?;

    let (mean, std) = normalization(true);
    let loader = BatchLoaderInit {
        batch_size: 2,
        input_size: 8,
        mean,
        std,
        shuffle: false,
        drop_last: false,
        keep_paths: true,
        device: Device::Cpu,
    }
    .build(&dataset, CropperInit::default().build())?;

    let out_dir = tempfile::tempdir()?;
    let run_dir = RunDir::create(out_dir.path(), &chrono::Local::now())?;

    let mut model = ConstModel;
    let stats = evaluate(
        EvalContext {
            model: &mut model,
            comm: &LocalCollective,
            run_dir: &run_dir,
            class_ids: &[0, 1],
        },
        loader,
    )?;

    // every sample belongs to class 1, so class 0 has no entry at all
    assert!(stats.per_class.contains_key(&1));
    assert!(!stats.per_class.contains_key(&0));

    // the model always predicts class 0
    let class_1 = stats.per_class[&1];
    assert!(class_1.acc1.abs() < 1e-9);
    assert!((stats.metrics["acc1"] - 0.0).abs() < 1e-9);
    assert!(stats.metrics.contains_key("loss"));

    // annotated copies land in neg/, named by truth and prediction
    let neg_files: Vec<_> = fs::read_dir(run_dir.dir_for_prediction(0))?
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(neg_files.len(), 4);
    assert!(neg_files.iter().all(|name| name.starts_with("t1_p0_")));
    assert_eq!(fs::read_dir(run_dir.dir_for_prediction(1))?.count(), 0);
    Ok(())
}

#[test]
fn inference_resolves_truth_prefixes_in_order() -> Result<()> {
    let data_dir = tempfile::tempdir()?;
    for name in ["t0_a.png", "t1_b.png", "neg_c.png", "pos_d.png"] {
        RgbImage::new(12, 12).save(data_dir.path().join(name))?;
    }
    let dataset = CropDataset::scan(data_dir.path())?;

    let (mean, std) = normalization(true);
    let mut model = ConstModel;
    let mut cropper = CropperInit::default().build();
    let predictions = run_inference(
        InferenceContext {
            model: &mut model,
            cropper: &mut cropper,
            input_size: 8,
            mean,
            std,
            device: Device::Cpu,
        },
        dataset.records(),
    )?;

    assert_eq!(predictions.len(), 4);
    // records are scanned in path order: neg_c, pos_d, t0_a, t1_b
    let truths: Vec<_> = predictions.iter().map(|record| record.truth).collect();
    assert_eq!(truths, vec![UNKNOWN_TRUTH, UNKNOWN_TRUTH, 0, 1]);

    for (record, expected) in predictions.iter().zip(dataset.records()) {
        assert_eq!(record.path, expected.path());
        assert_eq!(record.pred, 0);
        assert!((record.confidence - 2.0).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn full_image_box_is_used_without_sidecar() -> Result<()> {
    let data_dir = tempfile::tempdir()?;
    RgbImage::new(12, 12).save(data_dir.path().join("t0_a.png"))?;
    let dataset = CropDataset::scan(data_dir.path())?;
    assert_eq!(dataset.records()[0].bbox, BoxCxCyWH::full());
    Ok(())
}
