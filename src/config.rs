//! Pipeline configuration
//!
//! A `PipelineConfig` is built once (defaults, TOML file, CLI overrides) and
//! then passed by reference to every stage. Nothing mutates it afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::BackboneKind;
use crate::streaming::PrefetchDepth;
use crate::utils::error::{PlantDoctorError, Result};

/// Complete configuration of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub streaming: StreamingConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

/// Dataset discovery, split and batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root directory laid out as `<root>/<class_name>/<image_file>`
    pub dataset_dir: PathBuf,
    /// Images are resized to `image_size x image_size`
    pub image_size: usize,
    pub batch_size: usize,
    /// Fraction of samples held out for validation, in (0, 1)
    pub validation_fraction: f64,
    /// Seed of the train/validation partition
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("training_pipeline/PlantVillage"),
            image_size: 224,
            batch_size: 32,
            validation_fraction: 0.2,
            seed: 123,
        }
    }
}

/// Cache, shuffle and prefetch behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Keep decoded samples in memory after the first pass
    pub cache: bool,
    /// Capacity of the training shuffle buffer, in samples
    pub shuffle_buffer: usize,
    pub prefetch: PrefetchDepth,
    /// Upper bound on memory held by prefetched batches when depth is `auto`
    pub prefetch_budget_mb: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            cache: true,
            shuffle_buffer: 1000,
            prefetch: PrefetchDepth::Auto,
            prefetch_budget_mb: 256,
        }
    }
}

/// Classifier assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub backbone: BackboneKind,
    /// torchvision checkpoint (`.pth`) or converted record (`.mpk`) holding
    /// pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
    /// Build with a randomly initialized backbone when no weights are
    /// configured, instead of failing
    pub allow_random_backbone: bool,
    pub hidden_units: usize,
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backbone: BackboneKind::MobileNetV3Small,
            pretrained_weights: None,
            allow_random_backbone: false,
            hidden_units: 128,
            dropout: 0.2,
        }
    }
}

/// Optimization loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Draw per-epoch progress bars on the terminal
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            learning_rate: 1e-3,
            show_progress: true,
        }
    }
}

/// Where results are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub artifact_path: PathBuf,
    /// Optional JSON file receiving the per-epoch history
    pub history_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("plant_doctor_model.mpk"),
            history_path: None,
        }
    }
}

impl OutputConfig {
    /// Check that the artifact (and history, when set) can be created
    /// without writing anything.
    ///
    /// The nearest existing ancestor of each destination must be a writable
    /// directory and the destination itself must not be a directory.
    pub fn check_writable(&self) -> Result<()> {
        check_destination("artifact_path", &self.artifact_path)?;
        if let Some(history) = &self.history_path {
            check_destination("history_path", history)?;
        }
        Ok(())
    }
}

fn check_destination(field: &str, path: &Path) -> Result<()> {
    if path.file_name().is_none() {
        return Err(PlantDoctorError::Config(format!(
            "{} {:?} does not name a file",
            field, path
        )));
    }
    if path.is_dir() {
        return Err(PlantDoctorError::Config(format!(
            "{} {:?} is a directory",
            field, path
        )));
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let existing = parent
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("."));
    let metadata = std::fs::metadata(existing).map_err(|e| {
        PlantDoctorError::Config(format!("{} {:?}: cannot inspect {:?}: {}", field, path, existing, e))
    })?;
    if !metadata.is_dir() {
        return Err(PlantDoctorError::Config(format!(
            "{} {:?}: {:?} is not a directory",
            field, path, existing
        )));
    }
    if metadata.permissions().readonly() {
        return Err(PlantDoctorError::Config(format!(
            "{} {:?}: {:?} is read-only",
            field, path, existing
        )));
    }
    Ok(())
}

impl PipelineConfig {
    /// Load a configuration from a TOML file. Missing fields take defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlantDoctorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PlantDoctorError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Paths are checked by the stages that use them.
    pub fn validate(&self) -> Result<()> {
        let data = &self.data;
        if data.batch_size == 0 {
            return Err(PlantDoctorError::Config("batch_size must be at least 1".into()));
        }
        if data.image_size < 32 {
            return Err(PlantDoctorError::Config(format!(
                "image_size must be at least 32 pixels, got {}",
                data.image_size
            )));
        }
        if !(data.validation_fraction > 0.0 && data.validation_fraction < 1.0) {
            return Err(PlantDoctorError::Config(format!(
                "validation_fraction must lie in (0, 1), got {}",
                data.validation_fraction
            )));
        }
        if self.streaming.shuffle_buffer == 0 {
            return Err(PlantDoctorError::Config("shuffle_buffer must be at least 1".into()));
        }
        if let PrefetchDepth::Fixed(0) = self.streaming.prefetch {
            return Err(PlantDoctorError::Config(
                "a fixed prefetch depth must be at least 1; use \"disabled\" to turn it off".into(),
            ));
        }
        if self.model.hidden_units == 0 {
            return Err(PlantDoctorError::Config("hidden_units must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(PlantDoctorError::Config(format!(
                "dropout must lie in [0, 1), got {}",
                self.model.dropout
            )));
        }
        if self.training.epochs == 0 {
            return Err(PlantDoctorError::Config("epochs must be at least 1".into()));
        }
        if !(self.training.learning_rate.is_finite() && self.training.learning_rate > 0.0) {
            return Err(PlantDoctorError::Config(format!(
                "learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }
        Ok(())
    }
}
