use super::PredictionRecord;
use crate::common::*;

/// Copies every predicted-positive/negative image into the corresponding
/// destination tree, together with its same-stem `.txt` sidecar when one
/// exists.
pub fn partition_predictions(records: &[PredictionRecord], dest_root: &Path) -> Result<()> {
    let trees = [dest_root.join("negative"), dest_root.join("positive")];
    for tree in &trees {
        for sub_dir in ["images", "annotations"] {
            let dir = tree.join(sub_dir);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create '{}'", dir.display()))?;
        }
    }

    let mut num_copied = [0usize; 2];
    for record in records {
        let tree_index = usize::from(record.pred != 0);
        let tree = &trees[tree_index];

        let file_name = record
            .path
            .file_name()
            .ok_or_else(|| format_err!("image path '{}' has no file name", record.path.display()))?;
        let image_dest = tree.join("images").join(file_name);
        fs::copy(&record.path, &image_dest).with_context(|| {
            format!(
                "failed to copy '{}' to '{}'",
                record.path.display(),
                image_dest.display()
            )
        })?;

        let sidecar = record.path.with_extension("txt");
        if sidecar.is_file() {
            let sidecar_name = sidecar
                .file_name()
                .ok_or_else(|| format_err!("sidecar '{}' has no file name", sidecar.display()))?;
            let sidecar_dest = tree.join("annotations").join(sidecar_name);
            fs::copy(&sidecar, &sidecar_dest).with_context(|| {
                format!(
                    "failed to copy '{}' to '{}'",
                    sidecar.display(),
                    sidecar_dest.display()
                )
            })?;
        }
        num_copied[tree_index] += 1;
    }

    info!(
        "copied {} negative and {} positive images to '{}'",
        num_copied[0],
        num_copied[1],
        dest_root.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UNKNOWN_TRUTH;

    #[test]
    fn copies_images_and_present_sidecars() -> Result<()> {
        let src = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;

        RgbImage::new(4, 4).save(src.path().join("t1_a.png"))?;
        fs::write(src.path().join("t1_a.txt"), "0 0.5 0.5 1 1\n")?;
        RgbImage::new(4, 4).save(src.path().join("neg_b.png"))?;

        let records = vec![
            PredictionRecord {
                pred: 1,
                confidence: 3.5,
                truth: 1,
                path: src.path().join("t1_a.png"),
            },
            PredictionRecord {
                pred: 0,
                confidence: 1.0,
                truth: UNKNOWN_TRUTH,
                path: src.path().join("neg_b.png"),
            },
        ];
        partition_predictions(&records, dest.path())?;

        assert!(dest.path().join("positive/images/t1_a.png").is_file());
        assert!(dest.path().join("positive/annotations/t1_a.txt").is_file());
        assert!(dest.path().join("negative/images/neg_b.png").is_file());
        assert!(!dest.path().join("negative/annotations/neg_b.txt").exists());
        Ok(())
    }

    #[test]
    fn missing_image_fails_loud() {
        let dest = tempfile::tempdir().unwrap();
        let records = vec![PredictionRecord {
            pred: 0,
            confidence: 0.0,
            truth: UNKNOWN_TRUTH,
            path: PathBuf::from("/nonexistent/file.png"),
        }];
        assert!(partition_predictions(&records, dest.path()).is_err());
    }
}
