//! Step-wise metric aggregation with worker synchronization.

use crate::{common::*, sync::Collective};

pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// A windowed running statistic over weighted samples.
///
/// The window keeps the most recent values for smoothed progress display,
/// while `count` and `total` accumulate over the whole lifetime of the meter.
#[derive(Debug, Clone)]
pub struct Meter {
    window: VecDeque<f64>,
    window_size: usize,
    count: f64,
    total: f64,
}

impl Meter {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            count: 0.0,
            total: 0.0,
        }
    }

    pub fn update(&mut self, value: f64) {
        self.update_weighted(value, 1.0);
    }

    pub fn update_weighted(&mut self, value: f64, weight: f64) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.count += weight;
        self.total += value * weight;
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// The cumulative weighted mean since creation, or `None` when nothing
    /// was recorded yet.
    pub fn global_avg(&self) -> Option<f64> {
        (self.count > 0.0).then(|| self.total / self.count)
    }

    /// The plain mean over the recent window.
    pub fn avg(&self) -> Option<f64> {
        (!self.window.is_empty())
            .then(|| self.window.iter().sum::<f64>() / self.window.len() as f64)
    }

    /// The median over the recent window.
    pub fn median(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let mut values: Vec<_> = self.window.iter().copied().collect();
        values.sort_by(|lhs, rhs| lhs.partial_cmp(rhs).unwrap_or(Ordering::Equal));
        Some(values[values.len() / 2])
    }

    /// Folds another meter's lifetime sums into this one.
    pub fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.total += other.total;
    }

    pub(crate) fn set_sums(&mut self, count: f64, total: f64) {
        self.count = count;
        self.total = total;
    }
}

impl Display for Meter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.median(), self.global_avg()) {
            (Some(median), Some(global_avg)) => {
                write!(f, "{:.4} ({:.4})", median, global_avg)
            }
            _ => write!(f, "n/a"),
        }
    }
}

/// An ordered collection of named meters with a per-epoch lifecycle.
///
/// Created at loop start, updated every step, synchronized across workers at
/// loop end, then discarded after reporting.
#[derive(Debug, Clone)]
pub struct MetricBook {
    meters: IndexMap<String, Meter>,
    window_size: usize,
}

impl MetricBook {
    pub fn new(window_size: usize) -> Self {
        Self {
            meters: IndexMap::new(),
            window_size,
        }
    }

    pub fn update(&mut self, name: &str, value: f64) {
        self.update_weighted(name, value, 1.0);
    }

    pub fn update_weighted(&mut self, name: &str, value: f64, weight: f64) {
        let window_size = self.window_size;
        self.meters
            .entry(name.to_owned())
            .or_insert_with(|| Meter::new(window_size))
            .update_weighted(value, weight);
    }

    pub fn meter(&self, name: &str) -> Option<&Meter> {
        self.meters.get(name)
    }

    pub fn global_avg(&self, name: &str) -> Option<f64> {
        self.meters.get(name)?.global_avg()
    }

    /// Global averages of every meter that recorded at least one sample.
    /// Metrics never recorded are simply absent.
    pub fn global_averages(&self) -> IndexMap<String, f64> {
        self.meters
            .iter()
            .filter_map(|(name, meter)| Some((name.clone(), meter.global_avg()?)))
            .collect()
    }

    /// Folds another book into this one. Meters missing on either side are
    /// treated as empty.
    pub fn merge(&mut self, other: &Self) {
        for (name, meter) in &other.meters {
            let window_size = self.window_size;
            self.meters
                .entry(name.clone())
                .or_insert_with(|| Meter::new(window_size))
                .merge(meter);
        }
    }

    /// Combines per-worker sums and counts into a single global view.
    ///
    /// Meters are reduced in sorted name order so every worker lays out the
    /// exchanged buffer identically. With a single worker this is the
    /// identity.
    pub fn synchronize(&mut self, comm: &dyn Collective) -> Result<()> {
        let mut names: Vec<_> = self.meters.keys().cloned().collect();
        names.sort();

        let mut buffer: Vec<f64> = names
            .iter()
            .flat_map(|name| {
                let meter = &self.meters[name];
                [meter.count, meter.total]
            })
            .collect();
        comm.sum_f64(&mut buffer)?;

        for (name, chunk) in izip!(&names, buffer.chunks_exact(2)) {
            let meter = self
                .meters
                .get_mut(name)
                .ok_or_else(|| format_err!("meter '{}' vanished during synchronization", name))?;
            meter.set_sums(chunk[0], chunk[1]);
        }
        Ok(())
    }
}

impl Display for MetricBook {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = self
            .meters
            .iter()
            .map(|(name, meter)| format!("{}: {}", name, meter))
            .join("  ");
        write!(f, "{}", text)
    }
}
