//! On-disk model bundle layout.
//!
//! A model lives under `<base>/<version>/`, where `<version>` is a
//! numeric directory name. Each version directory must contain the
//! graph definition, its externally stored weights, and the class
//! label list.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

pub const MODEL_DEF_FILENAME: &str = "model.onnx";
pub const WEIGHTS_FILENAME: &str = "model.onnx.data";
pub const LABELS_FILENAME: &str = "labels.txt";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("no model definition found at {0}")]
    DefinitionNotFound(PathBuf),
    #[error("no weights found at {0}")]
    WeightsNotFound(PathBuf),
    #[error("no class labels found at {0}")]
    LabelsNotFound(PathBuf),
    #[error("no numeric version directories under {0}")]
    NoVersions(PathBuf),
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A validated model version directory.
pub struct ModelBundle {
    pub version: u64,
    pub model_path: PathBuf,
    pub labels: Vec<String>,
}

/// Pick the highest numeric version directory under `base` and validate
/// its contents.
pub fn load_latest_bundle(base: &Path) -> Result<ModelBundle, BundleError> {
    let (version, dir) = latest_version_dir(base)?;
    load_bundle(version, &dir)
}

fn latest_version_dir(base: &Path) -> Result<(u64, PathBuf), BundleError> {
    let entries = fs::read_dir(base).map_err(|source| BundleError::Io {
        path: base.to_path_buf(),
        source,
    })?;

    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|source| BundleError::Io {
            path: base.to_path_buf(),
            source,
        })?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(version) = entry.file_name().to_str().and_then(|s| s.parse().ok()) else {
            continue;
        };
        if latest.as_ref().is_none_or(|(v, _)| version > *v) {
            latest = Some((version, entry.path()));
        }
    }
    latest.ok_or_else(|| BundleError::NoVersions(base.to_path_buf()))
}

fn load_bundle(version: u64, dir: &Path) -> Result<ModelBundle, BundleError> {
    let model_path = dir.join(MODEL_DEF_FILENAME);
    if !model_path.is_file() {
        return Err(BundleError::DefinitionNotFound(model_path));
    }
    let weights_path = dir.join(WEIGHTS_FILENAME);
    if !weights_path.is_file() {
        return Err(BundleError::WeightsNotFound(weights_path));
    }
    let labels_path = dir.join(LABELS_FILENAME);
    if !labels_path.is_file() {
        return Err(BundleError::LabelsNotFound(labels_path));
    }

    let raw = fs::read_to_string(&labels_path).map_err(|source| BundleError::Io {
        path: labels_path,
        source,
    })?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    info!(version, classes = labels.len(), path = %dir.display(), "found model bundle");
    Ok(ModelBundle {
        version,
        model_path,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    fn write_version(base: &Path, version: u64, complete: bool) -> PathBuf {
        let dir = base.join(version.to_string());
        fs::create_dir_all(&dir).unwrap();
        File::create(dir.join(MODEL_DEF_FILENAME)).unwrap();
        if complete {
            File::create(dir.join(WEIGHTS_FILENAME)).unwrap();
            let mut labels = File::create(dir.join(LABELS_FILENAME)).unwrap();
            writeln!(labels, "__background__").unwrap();
            writeln!(labels, "widget").unwrap();
            writeln!(labels).unwrap();
        }
        dir
    }

    #[test]
    fn picks_highest_numeric_version() {
        let base = tempfile::tempdir().unwrap();
        write_version(base.path(), 2, true);
        write_version(base.path(), 10, true);
        fs::create_dir(base.path().join("checkpoint")).unwrap();

        let bundle = load_latest_bundle(base.path()).unwrap();
        assert_eq!(bundle.version, 10);
        assert_eq!(bundle.labels, vec!["__background__", "widget"]);
        assert!(bundle.model_path.ends_with("10/model.onnx"));
    }

    #[test]
    fn missing_weights_fail_the_load() {
        let base = tempfile::tempdir().unwrap();
        write_version(base.path(), 1, false);
        assert!(matches!(
            load_latest_bundle(base.path()),
            Err(BundleError::WeightsNotFound(_))
        ));
    }

    #[test]
    fn empty_base_path_is_an_error() {
        let base = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_latest_bundle(base.path()),
            Err(BundleError::NoVersions(_))
        ));
    }

    #[test]
    fn missing_labels_fail_the_load() {
        let base = tempfile::tempdir().unwrap();
        let dir = write_version(base.path(), 1, true);
        fs::remove_file(dir.join(LABELS_FILENAME)).unwrap();
        assert!(matches!(
            load_latest_bundle(base.path()),
            Err(BundleError::LabelsNotFound(_))
        ));
    }
}
