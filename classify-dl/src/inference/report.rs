use super::PredictionRecord;
use crate::{common::*, data::UNKNOWN_TRUTH, vis};
use image::Rgb;

/// Category colors in series order (matplotlib tab palette: blue, orange,
/// green, red).
pub const CATEGORY_COLORS: [Rgb<u8>; 4] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
];

const PLOT_WIDTH: u32 = 640;
const PLOT_HEIGHT: u32 = 480;
const PLOT_MARGIN: i64 = 40;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([0, 0, 0]);

/// The confidences and original sequence indexes of one outcome category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySeries {
    pub label: &'static str,
    pub confidences: Vec<f64>,
    pub indexes: Vec<usize>,
}

impl CategorySeries {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            confidences: vec![],
            indexes: vec![],
        }
    }

    fn push(&mut self, index: usize, confidence: f64) {
        self.indexes.push(index);
        self.confidences.push(confidence);
    }

    pub fn len(&self) -> usize {
        self.confidences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confidences.is_empty()
    }
}

/// Outcome categorization of an inference pass.
///
/// With known ground truth the series are TN/TP/FN/FP over the known-truth
/// records; otherwise correctness cannot be judged and records split by
/// predicted class only.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeSplit {
    pub by_truth: bool,
    pub series: Vec<CategorySeries>,
}

/// Buckets every record into exactly one category.
pub fn categorize(records: &[PredictionRecord]) -> OutcomeSplit {
    let by_truth = records.iter().any(|record| record.truth != UNKNOWN_TRUTH);

    if by_truth {
        let mut true_negative = CategorySeries::new("TN");
        let mut true_positive = CategorySeries::new("TP");
        let mut false_negative = CategorySeries::new("FN");
        let mut false_positive = CategorySeries::new("FP");

        for (index, record) in records.iter().enumerate() {
            if record.truth == UNKNOWN_TRUTH {
                continue;
            }
            let series = match (record.pred == record.truth, record.pred == 0) {
                (true, true) => &mut true_negative,
                (true, false) => &mut true_positive,
                (false, true) => &mut false_negative,
                (false, false) => &mut false_positive,
            };
            series.push(index, record.confidence);
        }

        OutcomeSplit {
            by_truth: true,
            series: vec![true_negative, true_positive, false_negative, false_positive],
        }
    } else {
        let mut negative = CategorySeries::new("Negative");
        let mut positive = CategorySeries::new("Positive");

        for (index, record) in records.iter().enumerate() {
            let series = if record.pred == 0 {
                &mut negative
            } else {
                &mut positive
            };
            series.push(index, record.confidence);
        }

        OutcomeSplit {
            by_truth: false,
            series: vec![negative, positive],
        }
    }
}

/// Writes the confidence histograms and the confidence-vs-index scatter
/// plot as PNG files named with the caller-supplied prefix.
pub fn write_report(
    split: &OutcomeSplit,
    records: &[PredictionRecord],
    prefix: &str,
) -> Result<()> {
    let path = |suffix: &str| PathBuf::from(format!("{}{}", prefix, suffix));
    if let Some(parent) = path("hist.png").parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
    }

    if split.by_truth {
        let series: Vec<(&str, Vec<f64>)> = split
            .series
            .iter()
            .map(|series| (series.label, series.confidences.clone()))
            .collect();
        draw_histogram(&path("hist_4.png"), &series, 30)?;

        let true_conf: Vec<f64> = split.series[0]
            .confidences
            .iter()
            .chain(&split.series[1].confidences)
            .copied()
            .collect();
        let false_conf: Vec<f64> = split.series[2]
            .confidences
            .iter()
            .chain(&split.series[3].confidences)
            .copied()
            .collect();
        draw_histogram(
            &path("hist_tf.png"),
            &[("True", true_conf), ("False", false_conf)],
            50,
        )?;
    } else {
        let series: Vec<(&str, Vec<f64>)> = split
            .series
            .iter()
            .map(|series| (series.label, series.confidences.clone()))
            .collect();
        draw_histogram(&path("hist_PN.png"), &series, 50)?;
    }

    draw_scatter(&path("scatter.png"), &split.series, records.len())?;

    let all: Vec<f64> = records.iter().map(|record| record.confidence).collect();
    draw_histogram(&path("hist.png"), &[("All", all)], 50)?;
    Ok(())
}

fn value_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for value in values {
        min = min.min(value);
        max = max.max(value);
    }
    if min > max {
        (0.0, 1.0)
    } else if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

fn blank_canvas() -> RgbImage {
    let mut canvas = RgbImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, BACKGROUND);
    vis::draw_rect(
        &mut canvas,
        PLOT_MARGIN - 1,
        PLOT_MARGIN - 1,
        PLOT_HEIGHT as i64 - PLOT_MARGIN,
        PLOT_WIDTH as i64 - PLOT_MARGIN,
        1,
        FRAME,
    );
    canvas
}

fn fill_rect(canvas: &mut RgbImage, top: i64, left: i64, bottom: i64, right: i64, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    for y in top.max(0)..=bottom.min(height as i64 - 1) {
        for x in left.max(0)..=right.min(width as i64 - 1) {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn save_plot(canvas: &RgbImage, path: &Path) -> Result<()> {
    canvas
        .save(path)
        .with_context(|| format!("failed to write plot '{}'", path.display()))?;
    Ok(())
}

/// Grouped bar histogram over the series' confidence values. Series are
/// colored in [`CATEGORY_COLORS`] order.
fn draw_histogram(path: &Path, series: &[(&str, Vec<f64>)], bins: usize) -> Result<()> {
    ensure!(!series.is_empty(), "histogram requires at least one series");
    let (min, max) = value_bounds(
        series
            .iter()
            .flat_map(|(_, values)| values.iter().copied()),
    );
    let bin_width = (max - min) / bins as f64;

    let counts: Vec<Vec<usize>> = series
        .iter()
        .map(|(_, values)| {
            let mut bucket = vec![0; bins];
            for &value in values {
                let bin = (((value - min) / bin_width) as usize).min(bins - 1);
                bucket[bin] += 1;
            }
            bucket
        })
        .collect();
    let max_count = counts.iter().flatten().copied().max().unwrap_or(0).max(1);

    let mut canvas = blank_canvas();
    let plot_width = PLOT_WIDTH as i64 - 2 * PLOT_MARGIN;
    let plot_height = PLOT_HEIGHT as i64 - 2 * PLOT_MARGIN;
    let bin_span = plot_width as f64 / bins as f64;
    let sub_span = bin_span / series.len() as f64;

    for (series_index, bucket) in counts.iter().enumerate() {
        let color = CATEGORY_COLORS[series_index % CATEGORY_COLORS.len()];
        for (bin, &count) in bucket.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let left = PLOT_MARGIN
                + (bin as f64 * bin_span + series_index as f64 * sub_span) as i64;
            let right = left + sub_span.max(1.0) as i64;
            let bar_height =
                (count as f64 / max_count as f64 * plot_height as f64).round() as i64;
            let bottom = PLOT_HEIGHT as i64 - PLOT_MARGIN - 1;
            fill_rect(&mut canvas, bottom - bar_height, left, bottom, right, color);
        }
    }
    save_plot(&canvas, path)
}

/// Confidence (x) vs. original sequence index (y) per category. Hit
/// categories are drawn as squares, miss categories as crosses.
fn draw_scatter(path: &Path, series: &[CategorySeries], total: usize) -> Result<()> {
    let (min, max) = value_bounds(
        series
            .iter()
            .flat_map(|series| series.confidences.iter().copied()),
    );

    let mut canvas = blank_canvas();
    let plot_width = PLOT_WIDTH as i64 - 2 * PLOT_MARGIN;
    let plot_height = PLOT_HEIGHT as i64 - 2 * PLOT_MARGIN;
    let total = total.max(1);

    for (series_index, category) in series.iter().enumerate() {
        let color = CATEGORY_COLORS[series_index % CATEGORY_COLORS.len()];

        for (&confidence, &index) in izip!(&category.confidences, &category.indexes) {
            let x = PLOT_MARGIN
                + ((confidence - min) / (max - min) * (plot_width - 1) as f64) as i64;
            let y = PLOT_HEIGHT as i64
                - PLOT_MARGIN
                - 1
                - (index as f64 / total as f64 * (plot_height - 1) as f64) as i64;

            if series_index < 2 {
                fill_rect(&mut canvas, y - 2, x - 2, y + 2, x + 2, color);
            } else {
                for offset in -3i64..=3 {
                    fill_rect(&mut canvas, y + offset, x + offset, y + offset, x + offset, color);
                    fill_rect(&mut canvas, y - offset, x + offset, y - offset, x + offset, color);
                }
            }
        }
    }
    save_plot(&canvas, path)
}
