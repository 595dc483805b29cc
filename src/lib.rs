//! # Plant Doctor
//!
//! A transfer-learning training pipeline for plant disease classification
//! built on the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: class discovery, seeded train/validation split and batching
//! - `streaming`: decoded-sample cache, shuffle buffer and background prefetch
//! - `model`: frozen pretrained backbone (MobileNetV3-Small or ResNet-18) plus a trainable head
//! - `training`: Adam + cross-entropy loop with per-epoch train/validation metrics
//! - `persistence`: single-file model artifact with an embedded manifest
//! - `run`: the end-to-end pipeline, as separate train and save steps
//! - `utils`: errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plant_doctor::backend::{default_device, TrainingBackend};
//! use plant_doctor::{run_pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::from_toml_file("plant_doctor.toml".as_ref())?;
//! let outcome = run_pipeline::<TrainingBackend>(&config, &default_device())?;
//! println!("saved {:?}", outcome.artifact_path);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod persistence;
pub mod run;
pub mod streaming;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{ClassVocabulary, DatasetLoader, LoadedDataset};
pub use model::{BackboneKind, ModelBuilder, PlantDoctorModel};
pub use persistence::{load_artifact, save_artifact, ArtifactManifest};
pub use run::{
    preflight, prepare_dataset, run_pipeline, train_model, PipelineOutcome, TrainedModel,
};
pub use streaming::SubsetStream;
pub use training::{EpochMetrics, RunPhase, Trainer, TrainingReport};
pub use utils::error::{ErrorCategory, PlantDoctorError, Result};
