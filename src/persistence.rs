//! Model artifact persistence
//!
//! An artifact is one MessagePack file written by burn's named recorder at
//! full precision. It holds a JSON manifest describing the architecture and
//! class names, followed by every parameter of the model (frozen and
//! trained). `load_artifact` rebuilds the architecture from the manifest and
//! loads the weights into it.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Record, Recorder},
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::ClassVocabulary;
use crate::model::{ModelSpec, PlantDoctorModel, PlantDoctorModelRecord};
use crate::training::EpochMetrics;
use crate::utils::error::{PlantDoctorError, Result};

/// Bumped whenever the artifact layout changes incompatibly
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

type ArtifactRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// Everything needed to use an artifact besides the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub model: ModelSpec,
    /// Label index -> class name
    pub class_names: Vec<String>,
    /// RFC 3339 creation time
    pub created_at: String,
    pub crate_version: String,
    pub final_metrics: Option<EpochMetrics>,
}

impl ArtifactManifest {
    pub fn new(model: ModelSpec, vocabulary: &ClassVocabulary) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            model,
            class_names: vocabulary.names().to_vec(),
            created_at: Utc::now().to_rfc3339(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            final_metrics: None,
        }
    }

    pub fn with_final_metrics(mut self, metrics: Option<EpochMetrics>) -> Self {
        self.final_metrics = metrics;
        self
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(PlantDoctorError::persistence(
                path,
                format!(
                    "unsupported artifact format version {} (expected {})",
                    self.format_version, ARTIFACT_FORMAT_VERSION
                ),
            ));
        }
        if self.class_names.len() != self.model.num_classes {
            return Err(PlantDoctorError::persistence(
                path,
                format!(
                    "manifest lists {} class names for a {}-class model",
                    self.class_names.len(),
                    self.model.num_classes
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Record)]
struct ModelArtifactRecord<B: Backend> {
    manifest: String,
    model: PlantDoctorModelRecord<B>,
}

/// Sibling path the artifact is staged at before the final rename
fn staging_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| PlantDoctorError::persistence(path, "destination has no file name"))?;
    let mut staged = name.to_os_string();
    staged.push(".partial");
    Ok(path.with_file_name(staged))
}

/// Serialize `model` and `manifest` into a single file at `path`.
///
/// The bytes go to `<path>.partial` first and are renamed into place, so a
/// failed write never leaves a truncated artifact at `path`. The model is only
/// borrowed and can be saved again after a failure.
pub fn save_artifact<B: Backend>(
    model: &PlantDoctorModel<B>,
    manifest: &ArtifactManifest,
    path: &Path,
) -> Result<PathBuf> {
    if manifest.model.num_classes != model.num_classes() {
        return Err(PlantDoctorError::persistence(
            path,
            format!(
                "manifest describes {} classes but the model has {}",
                manifest.model.num_classes,
                model.num_classes()
            ),
        ));
    }

    let manifest_json =
        serde_json::to_string(manifest).map_err(|e| PlantDoctorError::persistence(path, e))?;
    let record = ModelArtifactRecord {
        manifest: manifest_json,
        model: model.clone().into_record(),
    };
    let bytes = Recorder::<B>::record(&ArtifactRecorder::default(), record, ())
        .map_err(|e| PlantDoctorError::persistence(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PlantDoctorError::persistence(path, e))?;
    }

    let staged = staging_path(path)?;
    let written = fs::write(&staged, &bytes).and_then(|_| fs::rename(&staged, path));
    if let Err(e) = written {
        if staged.exists() {
            if let Err(cleanup) = fs::remove_file(&staged) {
                warn!("Could not remove staging file {:?}: {}", staged, cleanup);
            }
        }
        return Err(PlantDoctorError::persistence(path, e));
    }

    info!(
        "Saved model artifact to {:?} ({} bytes, {} classes)",
        path,
        bytes.len(),
        manifest.class_names.len()
    );
    Ok(path.to_path_buf())
}

/// Rebuild a model from an artifact written by [`save_artifact`]
pub fn load_artifact<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(PlantDoctorModel<B>, ArtifactManifest)> {
    let bytes = fs::read(path).map_err(|e| PlantDoctorError::persistence(path, e))?;
    let record: ModelArtifactRecord<B> = Recorder::<B>::load(&ArtifactRecorder::default(), bytes, device)
        .map_err(|e| PlantDoctorError::persistence(path, e))?;

    let manifest: ArtifactManifest = serde_json::from_str(&record.manifest)
        .map_err(|e| PlantDoctorError::persistence(path, format!("invalid manifest: {}", e)))?;
    manifest.validate(path)?;

    let model = manifest.model.init::<B>(device).load_record(record.model);
    Ok((model, manifest))
}
