//! Directory-per-class dataset discovery and image decoding
//!
//! Expected layout:
//!
//! ```text
//! root/
//! ├── Pepper__bell___Bacterial_spot/
//! │   ├── 0001.jpg
//! │   └── 0002.jpg
//! ├── Potato___Early_blight/
//! │   └── ...
//! └── ...
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::utils::error::{PlantDoctorError, Result};

/// File extensions treated as samples (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// A discovered image file and its label index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Ordered class names. Index in the list is the label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassVocabulary {
    names: Vec<String>,
}

impl ClassVocabulary {
    /// Build a vocabulary; names are sorted so label indices are stable.
    pub fn new(mut names: Vec<String>) -> Self {
        names.sort();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Every sample found under a dataset root, in class-then-file order
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    pub root: PathBuf,
    pub vocabulary: ClassVocabulary,
    pub samples: Vec<ImageSample>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Non-hidden entries below `dir` matching `keep`, sorted by file name.
///
/// `max_depth` of `None` walks the whole tree; hidden directories are not
/// descended into.
fn list_entries(
    dir: &Path,
    max_depth: Option<usize>,
    keep: impl Fn(&DirEntry) -> bool,
) -> Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }

    let mut paths = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| {
            PlantDoctorError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if keep(&entry) {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

impl DatasetIndex {
    /// Discover classes and samples under `root`.
    ///
    /// Classes are the immediate subdirectories; their images are collected
    /// at any depth below them.
    ///
    /// Fails with `DatasetNotFound` when the root is missing, is not a
    /// directory, or holds no class subdirectories. Empty classes are kept.
    pub fn discover(root: &Path) -> Result<Self> {
        info!("Discovering dataset under {:?}", root);

        if !root.is_dir() {
            return Err(PlantDoctorError::DatasetNotFound(root.to_path_buf()));
        }

        let class_dirs = list_entries(root, Some(1), |e| e.file_type().is_dir())?;
        if class_dirs.is_empty() {
            return Err(PlantDoctorError::DatasetNotFound(root.to_path_buf()));
        }

        let names = class_dirs
            .iter()
            .map(|dir| {
                dir.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        let vocabulary = ClassVocabulary::new(names);

        let mut samples = Vec::new();
        for (label, name) in vocabulary.names().iter().enumerate() {
            let files = list_entries(&root.join(name), None, |e| {
                e.file_type().is_file() && has_image_extension(e.path())
            })?;
            debug!("Class '{}' (label {}): {} images", name, label, files.len());
            samples.extend(files.into_iter().map(|path| ImageSample { path, label }));
        }

        info!(
            "Found {} files belonging to {} classes",
            samples.len(),
            vocabulary.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            vocabulary,
            samples,
        })
    }

    /// Number of samples per label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.vocabulary.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// Decode an image, convert to RGB and resize to `image_size x image_size`.
///
/// Returns CHW bytes in the native 0-255 range.
pub fn decode_image(path: &Path, image_size: usize) -> Result<Arc<[u8]>> {
    let load_err = |reason: String| PlantDoctorError::ImageLoad(path.to_path_buf(), reason);

    let img = ImageReader::open(path)
        .map_err(|e| load_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| load_err(e.to_string()))?
        .decode()
        .map_err(|e| load_err(e.to_string()))?;

    let side = image_size as u32;
    let rgb = img
        .resize_exact(side, side, FilterType::Triangle)
        .to_rgb8();

    let plane = image_size * image_size;
    let mut chw = vec![0u8; 3 * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        chw[i] = pixel[0];
        chw[plane + i] = pixel[1];
        chw[2 * plane + i] = pixel[2];
    }

    Ok(chw.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn write_image(path: &Path, width: u32, height: u32, color: [u8; 3]) {
        let img = ImageBuffer::from_fn(width, height, |_, _| Rgb(color));
        img.save(path).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        for class in ["Tomato_healthy", "Potato___Late_blight", "Apple_scab"] {
            std::fs::create_dir(dir.path().join(class)).unwrap();
        }
        write_image(&dir.path().join("Tomato_healthy/b.png"), 10, 10, [0, 255, 0]);
        write_image(&dir.path().join("Tomato_healthy/a.JPG"), 12, 8, [0, 200, 0]);
        write_image(&dir.path().join("Apple_scab/x.bmp"), 10, 10, [90, 60, 30]);
        std::fs::write(dir.path().join("Tomato_healthy/notes.txt"), "not an image").unwrap();
        std::fs::create_dir(dir.path().join(".thumbnails")).unwrap();
        std::fs::write(dir.path().join("README.md"), "top-level file").unwrap();
        dir
    }

    #[test]
    fn test_discovery_sorted_and_filtered() {
        let dir = fixture();
        let index = DatasetIndex::discover(dir.path()).unwrap();

        assert_eq!(
            index.vocabulary.names(),
            &["Apple_scab", "Potato___Late_blight", "Tomato_healthy"]
        );
        assert_eq!(index.samples.len(), 3);
        assert_eq!(index.class_counts(), vec![1, 0, 2]);

        let tomato: Vec<_> = index
            .samples
            .iter()
            .filter(|s| s.label == 2)
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(tomato, vec!["a.JPG", "b.png"]);
    }

    #[test]
    fn test_nested_class_images() {
        let dir = fixture();
        let nested = dir.path().join("Apple_scab/field_2/day_1");
        std::fs::create_dir_all(&nested).unwrap();
        write_image(&nested.join("y.png"), 10, 10, [80, 50, 20]);
        let hidden = dir.path().join("Apple_scab/.cache");
        std::fs::create_dir(&hidden).unwrap();
        write_image(&hidden.join("z.png"), 10, 10, [80, 50, 20]);

        let index = DatasetIndex::discover(dir.path()).unwrap();
        // Nested directories do not become classes
        assert_eq!(index.vocabulary.len(), 3);
        assert_eq!(index.class_counts(), vec![2, 0, 2]);
        let apple: Vec<_> = index.samples.iter().filter(|s| s.label == 0).map(|s| &s.path).collect();
        assert_eq!(apple, vec![&nested.join("y.png"), &dir.path().join("Apple_scab/x.bmp")]);
    }

    #[test]
    fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = DatasetIndex::discover(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, PlantDoctorError::DatasetNotFound(_)));
    }

    #[test]
    fn test_root_without_classes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("loose.jpg"), b"x").unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        let err = DatasetIndex::discover(dir.path()).unwrap_err();
        assert!(matches!(err, PlantDoctorError::DatasetNotFound(_)));
    }

    #[test]
    fn test_root_is_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.jpg");
        std::fs::write(&file, b"x").unwrap();
        assert!(DatasetIndex::discover(&file).is_err());
    }

    #[test]
    fn test_vocabulary_lookup() {
        let vocab = ClassVocabulary::new(vec!["b".into(), "c".into(), "a".into()]);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.names(), &["a", "b", "c"]);
    }

    #[test]
    fn test_decode_resizes_to_chw() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leaf.png");
        write_image(&path, 50, 20, [10, 20, 30]);

        let pixels = decode_image(&path, 16).unwrap();
        assert_eq!(pixels.len(), 3 * 16 * 16);
        assert!(pixels[..256].iter().all(|&v| v == 10));
        assert!(pixels[256..512].iter().all(|&v| v == 20));
        assert!(pixels[512..].iter().all(|&v| v == 30));
    }

    #[test]
    fn test_decode_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = decode_image(&path, 16).unwrap_err();
        assert!(matches!(err, PlantDoctorError::ImageLoad(p, _) if p == path));
    }
}
