//! Step-wise scalar logging seam.

use crate::common::*;
use std::io::BufWriter;
use tfrecord::{EventWriter, EventWriterInit};

/// Receives named scalars tagged with a category, plus an explicit advance
/// signal marking step boundaries. Zero or more loggers may be attached to
/// a loop.
pub trait StepLogger {
    fn scalar(&mut self, category: &str, name: &str, value: f64) -> Result<()>;
    fn advance(&mut self) -> Result<()>;
}

/// Writes scalars into a TensorBoard event file.
pub struct TensorBoardLogger {
    event_writer: EventWriter<BufWriter<fs::File>>,
    step: i64,
}

impl TensorBoardLogger {
    pub fn create(event_dir: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(event_dir)
            .with_context(|| format!("failed to create '{}'", event_dir.display()))?;
        let event_path_prefix = event_dir
            .join(prefix)
            .into_os_string()
            .into_string()
            .map_err(|_| format_err!("event path is not valid unicode"))?;

        let event_writer = EventWriterInit::default().from_prefix(event_path_prefix, None)?;
        Ok(Self {
            event_writer,
            step: 0,
        })
    }
}

impl Debug for TensorBoardLogger {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorBoardLogger")
            .field("step", &self.step)
            .finish()
    }
}

impl StepLogger for TensorBoardLogger {
    fn scalar(&mut self, category: &str, name: &str, value: f64) -> Result<()> {
        self.event_writer
            .write_scalar(format!("{}/{}", category, name), self.step, value as f32)?;
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        self.step += 1;
        Ok(())
    }
}
