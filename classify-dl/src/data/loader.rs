use super::{Batch, CropDataset, CropRecord};
use crate::{common::*, crop::Cropper};

pub const IMAGENET_DEFAULT_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_DEFAULT_STD: [f64; 3] = [0.229, 0.224, 0.225];
pub const IMAGENET_INCEPTION_MEAN: [f64; 3] = [0.5, 0.5, 0.5];
pub const IMAGENET_INCEPTION_STD: [f64; 3] = [0.5, 0.5, 0.5];

/// The mean/std pair selected by the dataset configuration.
pub fn normalization(imagenet_default_mean_and_std: bool) -> ([f64; 3], [f64; 3]) {
    if imagenet_default_mean_and_std {
        (IMAGENET_DEFAULT_MEAN, IMAGENET_DEFAULT_STD)
    } else {
        (IMAGENET_INCEPTION_MEAN, IMAGENET_INCEPTION_STD)
    }
}

/// Decodes a cropped image into a normalized CHW float tensor.
pub fn image_to_input_tensor(
    image: &DynamicImage,
    input_size: u32,
    mean: [f64; 3],
    std: [f64; 3],
) -> Result<Tensor> {
    let resized = image
        .resize_exact(input_size, input_size, FilterType::Triangle)
        .to_rgb8();
    let (width, height) = resized.dimensions();
    let raw = resized.into_raw();

    let tensor = Tensor::of_slice(&raw)
        .view([height as i64, width as i64, 3])
        .permute(&[2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0;
    let mean = Tensor::of_slice(&mean).to_kind(Kind::Float).view([3, 1, 1]);
    let std = Tensor::of_slice(&std).to_kind(Kind::Float).view([3, 1, 1]);
    Ok((tensor - mean) / std)
}

/// Batch loader options.
#[derive(Debug, Clone)]
pub struct BatchLoaderInit {
    pub batch_size: usize,
    pub input_size: u32,
    pub mean: [f64; 3],
    pub std: [f64; 3],
    pub shuffle: bool,
    pub drop_last: bool,
    /// Carry per-sample paths and bounding boxes into the batches.
    pub keep_paths: bool,
    pub device: Device,
}

impl BatchLoaderInit {
    pub fn build<'a>(self, dataset: &'a CropDataset, cropper: Cropper) -> Result<BatchLoader<'a>> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.input_size > 0, "input_size must be positive");

        let mut records: Vec<_> = dataset.records().iter().collect();
        if self.shuffle {
            records.shuffle(&mut StdRng::from_entropy());
        }

        Ok(BatchLoader {
            init: self,
            records,
            cursor: 0,
            cropper,
        })
    }
}

/// An ordered, finite batch source over a [`CropDataset`]. A fresh loader is
/// built per epoch.
pub struct BatchLoader<'a> {
    init: BatchLoaderInit,
    records: Vec<&'a CropRecord>,
    cursor: usize,
    cropper: Cropper,
}

impl Debug for BatchLoader<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLoader")
            .field("init", &self.init)
            .field("num_records", &self.records.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl BatchLoader<'_> {
    fn load_batch(&mut self, begin: usize, end: usize) -> Result<Batch> {
        let BatchLoaderInit {
            input_size,
            mean,
            std,
            keep_paths,
            device,
            ..
        } = self.init;

        let mut images = Vec::with_capacity(end - begin);
        let mut targets = Vec::with_capacity(end - begin);
        let mut paths = Vec::with_capacity(end - begin);
        let mut bboxes = Vec::with_capacity(end - begin);

        for record in &self.records[begin..end] {
            let path = record.path();
            let image = image::open(&path)
                .with_context(|| format!("failed to read image '{}'", path.display()))?;
            let cropped = self.cropper.crop(&image, &record.bbox)?;
            images.push(image_to_input_tensor(&cropped, input_size, mean, std)?);
            targets.push(record.truth);
            if keep_paths {
                paths.push(path);
                bboxes.push(record.bbox);
            }
        }

        let batch = Batch {
            images: Tensor::stack(&images, 0),
            paths: keep_paths.then(|| paths),
            bboxes: keep_paths.then(|| bboxes),
            targets: Tensor::of_slice(&targets),
        }
        .to_device(device);
        Ok(batch)
    }
}

impl Iterator for BatchLoader<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let begin = self.cursor;
        if begin >= self.records.len() {
            return None;
        }
        let end = (begin + self.init.batch_size).min(self.records.len());
        if self.init.drop_last && end - begin < self.init.batch_size {
            return None;
        }
        self.cursor = end;
        Some(self.load_batch(begin, end))
    }
}
