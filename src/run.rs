//! End-to-end pipeline: load -> stream -> build -> train -> persist
//!
//! Training and persisting are separate steps. [`train_model`] hands back
//! the trained model and [`TrainedModel::save`] only borrows it, so a failed
//! save can be retried without training again.

use std::path::PathBuf;

use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::{info, warn};

use crate::config::{OutputConfig, PipelineConfig};
use crate::dataset::{ClassVocabulary, DatasetLoader, LoadedDataset};
use crate::model::{ModelBuilder, ModelSummary, PlantDoctorModel};
use crate::persistence::{save_artifact, ArtifactManifest};
use crate::streaming::SubsetStream;
use crate::training::{Trainer, TrainingReport};
use crate::utils::error::Result;

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub artifact_path: PathBuf,
    pub vocabulary: ClassVocabulary,
    pub summary: ModelSummary,
    pub report: TrainingReport,
}

/// A trained classifier that has not necessarily been written anywhere yet
#[derive(Debug)]
pub struct TrainedModel<B: Backend> {
    pub model: PlantDoctorModel<B>,
    pub manifest: ArtifactManifest,
    pub vocabulary: ClassVocabulary,
    pub summary: ModelSummary,
    pub report: TrainingReport,
}

impl<B: Backend> TrainedModel<B> {
    /// Write the artifact, then the history when one is configured.
    ///
    /// Only the artifact is required: a history that cannot be written is
    /// logged and skipped.
    pub fn save(&self, output: &OutputConfig) -> Result<PathBuf> {
        let artifact_path = save_artifact(&self.model, &self.manifest, &output.artifact_path)?;

        if let Some(history_path) = &output.history_path {
            match self.report.save_json(history_path) {
                Ok(()) => info!("Saved training history to {:?}", history_path),
                Err(e) => warn!("Training history not written: {}", e),
            }
        }
        Ok(artifact_path)
    }

    pub fn outcome(&self, artifact_path: PathBuf) -> PipelineOutcome {
        PipelineOutcome {
            artifact_path,
            vocabulary: self.vocabulary.clone(),
            summary: self.summary,
            report: self.report.clone(),
        }
    }
}

/// Validate the configuration and discover the dataset
pub fn prepare_dataset(config: &PipelineConfig) -> Result<LoadedDataset> {
    config.validate()?;
    let dataset = DatasetLoader::new(&config.data).load()?;
    info!(
        "Classes found ({}): {:?}",
        dataset.vocabulary.len(),
        dataset.vocabulary.names()
    );
    Ok(dataset)
}

/// [`prepare_dataset`] plus a check that the outputs can be written.
///
/// Every configuration error surfaces here, before a model exists or any
/// image is decoded. This is all `train --dry-run` does.
pub fn preflight(config: &PipelineConfig) -> Result<LoadedDataset> {
    config.validate()?;
    config.output.check_writable()?;
    prepare_dataset(config)
}

/// Train a classifier as described by `config` without writing anything
pub fn train_model<B: AutodiffBackend>(
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<TrainedModel<B>> {
    let dataset = preflight(config)?;
    let LoadedDataset {
        vocabulary,
        training,
        validation,
        ..
    } = dataset;

    let batch_size = config.data.batch_size;
    let mut training =
        SubsetStream::training(training, batch_size, &config.streaming, config.data.seed);
    let mut validation = SubsetStream::validation(validation, batch_size, &config.streaming);

    let builder = ModelBuilder::new(&config.model, config.data.image_size, vocabulary.len())?;
    let model = builder.build::<B>(device)?;
    let summary = model.summary();

    let mut trainer = Trainer::<B>::new(&config.training, config.data.image_size, device.clone());
    let (model, report) = trainer.fit(model, &mut training, &mut validation)?;

    let manifest = ArtifactManifest::new(builder.spec().clone(), &vocabulary)
        .with_final_metrics(report.final_metrics().copied());
    Ok(TrainedModel {
        model,
        manifest,
        vocabulary,
        summary,
        report,
    })
}

/// Train a classifier as described by `config` and write its artifact
pub fn run_pipeline<B: AutodiffBackend>(
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<PipelineOutcome> {
    let trained = train_model::<B>(config, device)?;
    let artifact_path = trained.save(&config.output)?;
    info!("Training complete, model saved to {:?}", artifact_path);
    Ok(trained.outcome(artifact_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorCategory;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.data.batch_size = 0;
        let err = prepare_dataset(&config).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_prepare_missing_root() {
        let dir = TempDir::new().unwrap();
        let mut config = PipelineConfig::default();
        config.data.dataset_dir = dir.path().join("missing");
        let err = prepare_dataset(&config).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_preflight_rejects_unwritable_output() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"plain file").unwrap();

        let mut config = PipelineConfig::default();
        config.data.dataset_dir = dir.path().to_path_buf();
        config.output.artifact_path = blocker.join("model.mpk");
        let err = preflight(&config).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("artifact_path"));
    }
}
