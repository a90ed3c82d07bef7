//! Dataset discovery on the local filesystem.
//!
//! A dataset is a version directory under the datasets root:
//!
//! ```text
//! <root>/<version>/images/*.{jpg,jpeg,png}
//! <root>/<version>/ground_truth.csv      (optional)
//! ```
//!
//! The units of a job are the dataset's images in file-name order. That
//! order is the enumeration order workers process and persist against.

use std::path::{Path, PathBuf};

use serde::Serialize;

const IMAGES_DIR: &str = "images";
const GROUND_TRUTH_FILE: &str = "ground_truth.csv";
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Dataset name reported for every version directory.
pub const DEFAULT_DATASET_NAME: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset not found: {0}")]
    NotFound(String),

    #[error("Invalid dataset reference: {0}")]
    InvalidReference(String),

    #[error("No images found in {}", .0.display())]
    Empty(PathBuf),

    #[error("Image {filename} not found in dataset {version}")]
    ImageNotFound { version: String, filename: String },

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Summary of a dataset as listed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub version: String,
    pub name: String,
    pub images_dir: PathBuf,
    pub image_count: usize,
    pub has_ground_truth: bool,
}

/// A resolved dataset version directory.
#[derive(Debug, Clone)]
pub struct Dataset {
    version: String,
    dir: PathBuf,
}

impl Dataset {
    /// Resolve `version` under `root`.
    ///
    /// Rejects references that could escape the root (separators, `..`)
    /// and versions without an `images/` directory.
    pub fn open(root: &Path, version: &str) -> Result<Self, DatasetError> {
        if version.is_empty()
            || version.starts_with('.')
            || version.contains(['/', '\\'])
        {
            return Err(DatasetError::InvalidReference(version.to_string()));
        }

        let dir = root.join(version);
        if !dir.join(IMAGES_DIR).is_dir() {
            return Err(DatasetError::NotFound(version.to_string()));
        }

        Ok(Self {
            version: version.to_string(),
            dir,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn images_dir(&self) -> PathBuf {
        self.dir.join(IMAGES_DIR)
    }

    /// Path of the ground-truth sheet, if the dataset ships one.
    pub fn ground_truth_path(&self) -> Option<PathBuf> {
        let path = self.dir.join(GROUND_TRUTH_FILE);
        path.is_file().then_some(path)
    }

    /// All unit images, sorted by file name.
    pub fn images(&self) -> Result<Vec<PathBuf>, DatasetError> {
        let images_dir = self.images_dir();
        let entries = std::fs::read_dir(&images_dir).map_err(|source| DatasetError::Io {
            path: images_dir.clone(),
            source,
        })?;

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DatasetError::Io {
                path: images_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && has_image_extension(&path) {
                images.push(path);
            }
        }

        images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(images)
    }

    /// Unit images, failing when the dataset has none.
    pub fn require_images(&self) -> Result<Vec<PathBuf>, DatasetError> {
        let images = self.images()?;
        if images.is_empty() {
            return Err(DatasetError::Empty(self.images_dir()));
        }
        Ok(images)
    }

    /// Path of one image by file name.
    ///
    /// The resolved file must stay inside the images directory; names with
    /// separators or a leading dot, and symlinks pointing out, are refused.
    pub fn image_path(&self, filename: &str) -> Result<PathBuf, DatasetError> {
        if filename.is_empty() || filename.starts_with('.') || filename.contains(['/', '\\']) {
            return Err(DatasetError::Forbidden(filename.to_string()));
        }

        let images_dir = self.images_dir();
        let path = images_dir.join(filename);
        if !path.is_file() {
            return Err(DatasetError::ImageNotFound {
                version: self.version.clone(),
                filename: filename.to_string(),
            });
        }

        let canonical = |p: &Path| {
            p.canonicalize().map_err(|source| DatasetError::Io {
                path: p.to_path_buf(),
                source,
            })
        };
        let resolved = canonical(&path)?;
        if !resolved.starts_with(canonical(&images_dir)?) {
            return Err(DatasetError::Forbidden(filename.to_string()));
        }
        Ok(resolved)
    }

    pub fn info(&self) -> Result<DatasetInfo, DatasetError> {
        Ok(DatasetInfo {
            version: self.version.clone(),
            name: DEFAULT_DATASET_NAME.to_string(),
            images_dir: self.images_dir(),
            image_count: self.images()?.len(),
            has_ground_truth: self.ground_truth_path().is_some(),
        })
    }
}

/// List every dataset version under `root`, sorted by version name.
///
/// A missing root yields an empty list rather than an error.
pub fn list_datasets(root: &Path) -> Result<Vec<DatasetInfo>, DatasetError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(root).map_err(|source| DatasetError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut versions: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    versions.sort();

    let mut datasets = Vec::new();
    for version in versions {
        match Dataset::open(root, &version) {
            Ok(dataset) => datasets.push(dataset.info()?),
            Err(DatasetError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(datasets)
}

/// Media type served for an image file, by extension.
pub fn media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_dataset(root: &Path, version: &str, files: &[&str], ground_truth: bool) {
        let images = root.join(version).join(IMAGES_DIR);
        std::fs::create_dir_all(&images).unwrap();
        for file in files {
            std::fs::write(images.join(file), b"img").unwrap();
        }
        if ground_truth {
            std::fs::write(root.join(version).join(GROUND_TRUTH_FILE), "Box Label\n").unwrap();
        }
    }

    #[test]
    fn images_are_sorted_and_filtered_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(
            tmp.path(),
            "version-1",
            &["b.png", "a.jpg", "notes.txt", "c.JPEG"],
            false,
        );

        let dataset = Dataset::open(tmp.path(), "version-1").unwrap();
        let names: Vec<_> = dataset
            .images()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["a.jpg", "b.png", "c.JPEG"]);
    }

    #[test]
    fn open_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        assert_matches!(
            Dataset::open(tmp.path(), "../etc"),
            Err(DatasetError::InvalidReference(_))
        );
        assert_matches!(
            Dataset::open(tmp.path(), ".hidden"),
            Err(DatasetError::InvalidReference(_))
        );
    }

    #[test]
    fn open_missing_version_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        assert_matches!(
            Dataset::open(tmp.path(), "version-9"),
            Err(DatasetError::NotFound(_))
        );
    }

    #[test]
    fn require_images_fails_on_empty_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), "empty", &[], false);
        let dataset = Dataset::open(tmp.path(), "empty").unwrap();
        assert_matches!(dataset.require_images(), Err(DatasetError::Empty(_)));
    }

    #[test]
    fn image_path_stays_inside_images_dir() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), "version-1", &["a.jpg"], true);
        let dataset = Dataset::open(tmp.path(), "version-1").unwrap();

        let path = dataset.image_path("a.jpg").unwrap();
        assert!(path.ends_with("version-1/images/a.jpg"));

        assert_matches!(
            dataset.image_path("../ground_truth.csv"),
            Err(DatasetError::Forbidden(_))
        );
        assert_matches!(
            dataset.image_path("missing.png"),
            Err(DatasetError::ImageNotFound { .. })
        );
    }

    #[cfg(unix)]
    #[test]
    fn image_path_refuses_symlink_out_of_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), "version-1", &[], false);
        let outside = tmp.path().join("secret.png");
        std::fs::write(&outside, b"secret").unwrap();
        std::os::unix::fs::symlink(&outside, tmp.path().join("version-1/images/link.png")).unwrap();

        let dataset = Dataset::open(tmp.path(), "version-1").unwrap();
        assert_matches!(dataset.image_path("link.png"), Err(DatasetError::Forbidden(_)));
    }

    #[test]
    fn media_type_follows_extension() {
        assert_eq!(media_type(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(media_type(Path::new("a.webp")), "image/webp");
        assert_eq!(media_type(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn list_datasets_reports_counts_and_ground_truth() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), "version-2", &["x.png"], false);
        make_dataset(tmp.path(), "version-1", &["a.jpg", "b.jpg"], true);
        std::fs::create_dir_all(tmp.path().join("scratch")).unwrap();

        let datasets = list_datasets(tmp.path()).unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].version, "version-1");
        assert_eq!(datasets[0].image_count, 2);
        assert!(datasets[0].has_ground_truth);
        assert_eq!(datasets[1].version, "version-2");
        assert!(!datasets[1].has_ground_truth);
    }

    #[test]
    fn list_datasets_on_missing_root_is_empty() {
        let datasets = list_datasets(Path::new("/definitely/not/here")).unwrap();
        assert!(datasets.is_empty());
    }
}
