use super::UNKNOWN_TRUTH;
use crate::{bbox::BoxCxCyWH, common::*};
use std::ffi::OsStr;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// One annotated image on disk: image root, relative path, the bounding box
/// from the same-stem `.txt` sidecar, and the label parsed from the file
/// name prefix.
#[derive(Debug, Clone)]
pub struct CropRecord {
    pub root: PathBuf,
    pub rel_path: PathBuf,
    pub bbox: BoxCxCyWH,
    pub truth: i64,
}

impl CropRecord {
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.rel_path)
    }
}

/// The list of annotated crops under a dataset root, in deterministic
/// path order.
#[derive(Debug, Clone)]
pub struct CropDataset {
    root: PathBuf,
    records: Vec<CropRecord>,
}

impl CropDataset {
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        ensure!(root.is_dir(), "'{}' is not a directory", root.display());

        let pattern = format!("{}/**/*", root.display());
        let mut records = vec![];

        for entry in glob::glob(&pattern)? {
            let path = entry?;
            if !path.is_file() || !has_image_extension(&path) {
                continue;
            }

            let rel_path = path.strip_prefix(root)?.to_owned();
            let file_name = path
                .file_name()
                .and_then(OsStr::to_str)
                .ok_or_else(|| format_err!("non-unicode file name '{}'", path.display()))?;

            let bbox = read_bbox_sidecar(&path.with_extension("txt"))?
                .unwrap_or_else(BoxCxCyWH::full);
            records.push(CropRecord {
                root: root.to_owned(),
                rel_path,
                bbox,
                truth: parse_truth_label(file_name),
            });
        }

        ensure!(
            !records.is_empty(),
            "no image files found under '{}'",
            root.display()
        );
        records.sort_by(|lhs, rhs| lhs.rel_path.cmp(&rhs.rel_path));

        Ok(Self {
            root: root.to_owned(),
            records,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records(&self) -> &[CropRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted distinct known class ids present in the dataset.
    pub fn class_ids(&self) -> Vec<i64> {
        self.records
            .iter()
            .map(|record| record.truth)
            .filter(|&truth| truth != UNKNOWN_TRUTH)
            .sorted()
            .dedup()
            .collect()
    }
}

/// Parses the `t<digit>` prefix of an annotated file name. A name without
/// the pattern means the ground truth is unknown, not malformed.
pub fn parse_truth_label(file_name: &str) -> i64 {
    let prefix = file_name.split('_').next().unwrap_or("");
    let mut chars = prefix.chars();
    match (chars.next(), chars.next()) {
        (Some('t'), Some(digit)) if digit.is_ascii_digit() => digit as i64 - '0' as i64,
        _ => UNKNOWN_TRUTH,
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn read_bbox_sidecar(path: &Path) -> Result<Option<BoxCxCyWH>> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read annotation '{}'", path.display()))?;
    let line = match text.lines().find(|line| !line.trim().is_empty()) {
        Some(line) => line,
        None => return Ok(None),
    };

    // "class cx cy w h" in normalized units
    let fields: Vec<f64> = line
        .split_whitespace()
        .map(|field| {
            field
                .parse()
                .with_context(|| format!("malformed annotation '{}'", path.display()))
        })
        .try_collect()?;
    ensure!(
        fields.len() == 5,
        "expect 5 fields in annotation '{}', but got {}",
        path.display(),
        fields.len()
    );

    Ok(Some(BoxCxCyWH::new(
        fields[1], fields[2], fields[3], fields[4],
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_prefix_parsing() {
        assert_eq!(parse_truth_label("t0_sample.jpg"), 0);
        assert_eq!(parse_truth_label("t1_sample.jpg"), 1);
        assert_eq!(parse_truth_label("neg_sample.jpg"), UNKNOWN_TRUTH);
        assert_eq!(parse_truth_label("pos_sample.jpg"), UNKNOWN_TRUTH);
        assert_eq!(parse_truth_label(""), UNKNOWN_TRUTH);
        assert_eq!(parse_truth_label("tx_sample.jpg"), UNKNOWN_TRUTH);
    }

    #[test]
    fn scan_collects_images_and_sidecars() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();

        RgbImage::new(8, 8).save(root.join("t1_a.png"))?;
        fs::write(root.join("t1_a.txt"), "0 0.5 0.5 0.4 0.2\n")?;
        RgbImage::new(8, 8).save(root.join("neg_b.png"))?;
        fs::write(root.join("notes.txt"), "not an image\n")?;

        let dataset = CropDataset::scan(root)?;
        assert_eq!(dataset.len(), 2);

        let records = dataset.records();
        assert_eq!(records[0].truth, UNKNOWN_TRUTH);
        assert_eq!(records[1].truth, 1);
        assert_eq!(records[1].bbox, BoxCxCyWH::new(0.5, 0.5, 0.4, 0.2)?);
        assert_eq!(records[0].bbox, BoxCxCyWH::full());
        assert_eq!(dataset.class_ids(), vec![1]);
        Ok(())
    }
}
