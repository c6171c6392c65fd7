//! Epoch-level training and evaluation loops.

mod eval;
mod train;

pub use eval::*;
pub use train::*;

use crate::common::*;

pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";

/// Output context of one evaluation run. The timestamp/naming policy is
/// supplied by the caller instead of being derived from the wall clock
/// inside the loop.
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
    pos_dir: PathBuf,
    neg_dir: PathBuf,
}

impl RunDir {
    pub fn create(base_dir: &Path, timestamp: &DateTime<Local>) -> Result<Self> {
        let root = base_dir.join(format!("eval_{}", timestamp.format(FILE_STRFTIME)));
        let pos_dir = root.join("pos");
        let neg_dir = root.join("neg");

        fs::create_dir_all(&pos_dir)
            .with_context(|| format!("failed to create '{}'", pos_dir.display()))?;
        fs::create_dir_all(&neg_dir)
            .with_context(|| format!("failed to create '{}'", neg_dir.display()))?;

        Ok(Self {
            root,
            pos_dir,
            neg_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The artifact directory selected by the predicted class.
    pub fn dir_for_prediction(&self, pred: i64) -> &Path {
        if pred == 0 {
            &self.neg_dir
        } else {
            &self.pos_dir
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_dir_creates_pos_and_neg() -> Result<()> {
        let base = tempfile::tempdir()?;
        let timestamp = Local::now();
        let run_dir = RunDir::create(base.path(), &timestamp)?;

        assert!(run_dir.dir_for_prediction(0).ends_with("neg"));
        assert!(run_dir.dir_for_prediction(1).ends_with("pos"));
        assert!(run_dir.dir_for_prediction(0).is_dir());
        assert!(run_dir.dir_for_prediction(1).is_dir());
        assert!(run_dir.root().starts_with(base.path()));
        Ok(())
    }
}
