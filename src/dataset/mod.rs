//! Dataset loading
//!
//! - `loader`: class discovery and image decoding
//! - `split`: seeded train/validation partition
//! - `batcher`: burn `Batcher` turning decoded samples into tensors
//!
//! `DatasetLoader::load` ties these together and returns a vocabulary plus
//! two lazy `Subset`s. Nothing is decoded until a batch is requested.

pub mod batcher;
pub mod loader;
pub mod split;

pub use batcher::{ImageBatch, ImageBatcher, ImageItem};
pub use loader::{decode_image, ClassVocabulary, DatasetIndex, ImageSample};
pub use split::{split_samples, DatasetSplit, SplitConfig};

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::DataConfig;
use crate::utils::error::{PlantDoctorError, Result};

/// One side of the split. Samples are decoded on demand.
#[derive(Debug, Clone)]
pub struct Subset {
    samples: Arc<[ImageSample]>,
    image_size: usize,
}

impl Subset {
    pub fn new(samples: Vec<ImageSample>, image_size: usize) -> Self {
        Self {
            samples: samples.into(),
            image_size,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    /// Number of batches of `batch_size`, counting a smaller final batch
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size)
    }

    /// Decode the sample at `index`
    pub fn decode(&self, index: usize) -> Result<ImageItem> {
        let sample = &self.samples[index];
        Ok(ImageItem {
            pixels: decode_image(&sample.path, self.image_size)?,
            label: sample.label,
            path: sample.path.clone(),
        })
    }
}

/// Everything the rest of the pipeline needs from the dataset
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub root: PathBuf,
    pub vocabulary: ClassVocabulary,
    pub training: Subset,
    pub validation: Subset,
}

/// Per-class and per-subset sample counts
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub classes: Vec<(String, usize)>,
    pub total: usize,
    pub training: usize,
    pub validation: usize,
}

impl LoadedDataset {
    pub fn stats(&self) -> DatasetStats {
        let mut counts = vec![0usize; self.vocabulary.len()];
        for sample in self.training.samples().iter().chain(self.validation.samples()) {
            counts[sample.label] += 1;
        }
        DatasetStats {
            classes: self
                .vocabulary
                .names()
                .iter()
                .cloned()
                .zip(counts)
                .collect(),
            total: self.training.len() + self.validation.len(),
            training: self.training.len(),
            validation: self.validation.len(),
        }
    }
}

/// Discovers and splits a directory-per-class dataset
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    config: DataConfig,
}

impl DatasetLoader {
    pub fn new(config: &DataConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Discover classes, split samples and return both subsets.
    ///
    /// All failures here are configuration errors and happen before any
    /// image is decoded.
    pub fn load(&self) -> Result<LoadedDataset> {
        let split_config = SplitConfig::new(self.config.validation_fraction, self.config.seed)?;
        let index = DatasetIndex::discover(&self.config.dataset_dir)?;
        let split = split_samples(&index.samples, &split_config);

        if split.training.is_empty() || split.validation.is_empty() {
            return Err(PlantDoctorError::Config(format!(
                "{} images under {:?} cannot be split into non-empty training and validation subsets with validation_fraction {}",
                index.samples.len(),
                index.root,
                self.config.validation_fraction
            )));
        }

        info!(
            "Using {} files for training, {} files for validation",
            split.training.len(),
            split.validation.len()
        );

        Ok(LoadedDataset {
            root: index.root,
            vocabulary: index.vocabulary,
            training: Subset::new(split.training, self.config.image_size),
            validation: Subset::new(split.validation, self.config.image_size),
        })
    }
}
