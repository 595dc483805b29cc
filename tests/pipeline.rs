//! End-to-end runs of the training pipeline on a synthetic dataset

use std::fs;
use std::path::{Path, PathBuf};

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::tensor::{Distribution, Tensor};
use image::{ImageBuffer, Rgb};
use tempfile::TempDir;

use plant_doctor::config::StreamingConfig;
use plant_doctor::streaming::PrefetchDepth;
use plant_doctor::{
    load_artifact, run_pipeline, train_model, DatasetLoader, ErrorCategory, PipelineConfig,
    SubsetStream,
};

type TestBackend = Autodiff<NdArray>;

const CLASSES: [(&str, [u8; 3]); 3] = [
    ("Pepper__bell___Bacterial_spot", [180, 40, 40]),
    ("Potato___healthy", [40, 180, 40]),
    ("Tomato_Leaf_Mold", [40, 40, 180]),
];

fn synthetic_dataset(root: &Path, per_class: usize) {
    for (name, color) in CLASSES {
        let class_dir = root.join(name);
        fs::create_dir_all(&class_dir).unwrap();
        for i in 0..per_class {
            let shade = (i % 20) as u8;
            ImageBuffer::from_fn(10, 8, |x, _| {
                Rgb([
                    color[0].saturating_add(shade),
                    color[1],
                    color[2].saturating_sub(x as u8),
                ])
            })
            .save(class_dir.join(format!("img_{:03}.png", i)))
            .unwrap();
        }
    }
}

fn config(root: PathBuf, artifact: PathBuf) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.data.dataset_dir = root;
    config.data.image_size = 32;
    config.data.batch_size = 32;
    config.streaming.prefetch = PrefetchDepth::Fixed(2);
    config.training.show_progress = false;
    config.model.allow_random_backbone = true;
    config.output.artifact_path = artifact;
    config
}

#[test]
fn test_split_and_batch_sizes() {
    let data = TempDir::new().unwrap();
    synthetic_dataset(data.path(), 100);
    let config = config(data.path().to_path_buf(), data.path().join("unused.mpk"));

    let dataset = DatasetLoader::new(&config.data).load().unwrap();
    assert_eq!(dataset.vocabulary.len(), 3);
    assert_eq!(dataset.training.len(), 240);
    assert_eq!(dataset.validation.len(), 60);

    let mut training = SubsetStream::training(
        dataset.training,
        32,
        &StreamingConfig::default(),
        config.data.seed,
    );
    let validation = SubsetStream::validation(dataset.validation, 32, &StreamingConfig::default());
    assert_eq!(training.num_batches(), 8);
    assert_eq!(validation.num_batches(), 2);

    let sizes: Vec<usize> = training
        .epoch()
        .unwrap()
        .map(|batch| batch.unwrap().len())
        .collect();
    assert_eq!(sizes, vec![32, 32, 32, 32, 32, 32, 32, 16]);
}

#[test]
fn test_end_to_end_training() {
    let data = TempDir::new().unwrap();
    synthetic_dataset(data.path(), 100);
    let out = TempDir::new().unwrap();
    let artifact = out.path().join("plant_doctor_model.mpk");

    let config = config(data.path().to_path_buf(), artifact.clone());
    let outcome = run_pipeline::<TestBackend>(&config, &Default::default()).unwrap();

    assert_eq!(outcome.artifact_path, artifact);
    assert_eq!(outcome.vocabulary.len(), 3);
    assert_eq!(outcome.summary.num_classes, 3);

    assert_eq!(outcome.report.epochs.len(), 5);
    for metrics in &outcome.report.epochs {
        assert!((0.0..=1.0).contains(&metrics.val_accuracy));
        assert!((0.0..=1.0).contains(&metrics.train_accuracy));
    }

    let files: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
    assert!(artifact.is_file());

    let (model, manifest) = load_artifact::<NdArray>(&artifact, &Default::default()).unwrap();
    assert_eq!(model.num_classes(), 3);
    assert_eq!(manifest.class_names, outcome.vocabulary.names());
    assert_eq!(manifest.model.image_size, 32);
    assert_eq!(
        manifest.final_metrics.as_ref(),
        outcome.report.final_metrics()
    );
}

#[test]
fn test_history_written_next_to_artifact() {
    let data = TempDir::new().unwrap();
    synthetic_dataset(data.path(), 10);
    let out = TempDir::new().unwrap();

    let mut config = config(data.path().to_path_buf(), out.path().join("model.mpk"));
    config.data.batch_size = 8;
    config.training.epochs = 2;
    config.output.history_path = Some(out.path().join("history.json"));

    let outcome = run_pipeline::<TestBackend>(&config, &Default::default()).unwrap();
    let json = fs::read_to_string(out.path().join("history.json")).unwrap();
    let saved: plant_doctor::TrainingReport = serde_json::from_str(&json).unwrap();
    assert_eq!(saved, outcome.report);
}

#[test]
fn test_missing_dataset_root() {
    let out = TempDir::new().unwrap();
    let artifact = out.path().join("plant_doctor_model.mpk");
    let config = config(out.path().join("does_not_exist"), artifact.clone());

    let err = run_pipeline::<TestBackend>(&config, &Default::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(!artifact.exists());
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn test_zero_class_dataset() {
    let data = TempDir::new().unwrap();
    fs::write(data.path().join("README.txt"), b"no classes here").unwrap();
    let out = TempDir::new().unwrap();
    let artifact = out.path().join("model.mpk");

    let err = run_pipeline::<TestBackend>(
        &config(data.path().to_path_buf(), artifact.clone()),
        &Default::default(),
    )
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(!artifact.exists());
}

#[test]
fn test_save_retried_after_failure() {
    let data = TempDir::new().unwrap();
    synthetic_dataset(data.path(), 10);
    let out = TempDir::new().unwrap();
    let mut config = config(data.path().to_path_buf(), out.path().join("model.mpk"));
    config.data.batch_size = 8;
    config.training.epochs = 1;

    let trained = train_model::<TestBackend>(&config, &Default::default()).unwrap();

    // The destination turns into a regular file after the preflight passed
    let blocker = out.path().join("blocker");
    fs::write(&blocker, b"plain file").unwrap();
    let mut output = config.output.clone();
    output.artifact_path = blocker.join("model.mpk");
    let err = trained.save(&output).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Persistence);

    let saved = trained.save(&config.output).unwrap();
    assert_eq!(saved, config.output.artifact_path);

    let device = Default::default();
    let (loaded, manifest) = load_artifact::<NdArray>(&saved, &device).unwrap();
    assert_eq!(manifest, trained.manifest);
    let input =
        Tensor::<NdArray, 4>::random([2, 3, 32, 32], Distribution::Uniform(0.0, 255.0), &device);
    let expected: Vec<f32> = trained
        .model
        .valid()
        .forward(input.clone())
        .into_data()
        .to_vec()
        .unwrap();
    let got: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
    assert_eq!(expected, got);
}

#[test]
fn test_history_failure_keeps_artifact() {
    let data = TempDir::new().unwrap();
    synthetic_dataset(data.path(), 10);
    let out = TempDir::new().unwrap();
    let mut config = config(data.path().to_path_buf(), out.path().join("model.mpk"));
    config.data.batch_size = 8;
    config.training.epochs = 1;

    let trained = train_model::<TestBackend>(&config, &Default::default()).unwrap();
    let blocker = out.path().join("blocker");
    fs::write(&blocker, b"plain file").unwrap();
    let mut output = config.output.clone();
    output.history_path = Some(blocker.join("history.json"));

    let saved = trained.save(&output).unwrap();
    assert!(saved.is_file());
    assert!(!blocker.join("history.json").exists());
}

#[test]
fn test_unwritable_output_rejected_before_training() {
    let data = TempDir::new().unwrap();
    synthetic_dataset(data.path(), 10);
    let out = TempDir::new().unwrap();
    let blocker = out.path().join("blocker");
    fs::write(&blocker, b"plain file").unwrap();

    let config = config(data.path().to_path_buf(), blocker.join("model.mpk"));
    let err = run_pipeline::<TestBackend>(&config, &Default::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
}

#[test]
fn test_missing_pretrained_weights() {
    let data = TempDir::new().unwrap();
    synthetic_dataset(data.path(), 10);
    let out = TempDir::new().unwrap();
    let artifact = out.path().join("model.mpk");

    let mut config = config(data.path().to_path_buf(), artifact.clone());
    config.model.allow_random_backbone = false;
    let err = run_pipeline::<TestBackend>(&config, &Default::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ModelConstruction);
    assert!(!artifact.exists());
}
