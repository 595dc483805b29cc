//! Error Handling Module
//!
//! Defines the error type shared by every stage of the training pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Plant Doctor pipeline operations
#[derive(Error, Debug)]
pub enum PlantDoctorError {
    /// Dataset root is missing, not a directory, or has no class subdirectories
    #[error("Dataset not found at '{0}': expected <root>/<class_name>/<image_file>")]
    DatasetNotFound(PathBuf),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error loading or decoding an image during batch preparation
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// The classifier cannot be built for zero classes
    #[error("Invalid class count {0}: the classifier needs at least one class")]
    InvalidClassCount(usize),

    /// Model construction failed (e.g. pretrained weights could not be loaded)
    #[error("Model error: {0}")]
    Model(String),

    /// Failure inside the optimization loop
    #[error("Training error at epoch {epoch}: {reason}")]
    Training { epoch: usize, reason: String },

    /// Artifact could not be written or read back
    #[error("Persistence error at '{path}': {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure classes reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Data,
    ModelConstruction,
    Training,
    Persistence,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "ConfigurationError"),
            ErrorCategory::Data => write!(f, "DataError"),
            ErrorCategory::ModelConstruction => write!(f, "ModelConstructionError"),
            ErrorCategory::Training => write!(f, "TrainingError"),
            ErrorCategory::Persistence => write!(f, "PersistenceError"),
        }
    }
}

impl PlantDoctorError {
    /// Which failure class this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlantDoctorError::DatasetNotFound(_) | PlantDoctorError::Config(_) => {
                ErrorCategory::Configuration
            }
            PlantDoctorError::ImageLoad(..) | PlantDoctorError::Io(_) => ErrorCategory::Data,
            PlantDoctorError::InvalidClassCount(_) | PlantDoctorError::Model(_) => {
                ErrorCategory::ModelConstruction
            }
            PlantDoctorError::Training { .. } => ErrorCategory::Training,
            PlantDoctorError::Persistence { .. } => ErrorCategory::Persistence,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PlantDoctorError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type for Plant Doctor operations
pub type Result<T> = std::result::Result<T, PlantDoctorError>;
