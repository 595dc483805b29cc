//! Pretrained backbone weights
//!
//! Two file formats are accepted:
//!
//! - torchvision ImageNet checkpoints (`.pth` / `.pt`), e.g.
//!   `resnet18-f37072fd.pth` or `mobilenet_v3_small-047dcff4.pth`. They are
//!   read with burn-import's PyTorch recorder and their keys are remapped onto
//!   this crate's module names. Batch-norm `weight`/`bias` become
//!   `gamma`/`beta` inside the recorder.
//! - burn records (`.mpk`) written by [`save_backbone_weights`]. The
//!   `import-weights` CLI command converts a checkpoint once so later runs
//!   skip the PyTorch reader.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{CompactRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::{debug, info};

use super::backbone::{Backbone, BackboneKind, BackboneRecord};
use super::mobilenet::{block_layout, MobileNetV3Small, MobileNetV3SmallRecord};
use super::resnet::{ResNet18, ResNet18Record};
use crate::utils::error::{PlantDoctorError, Result};

/// Whether `path` names a PyTorch checkpoint rather than a burn record
pub fn is_torch_checkpoint(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("pth") | Some("pt")
    )
}

/// Regex rules `(pattern, replacement)` from torchvision state-dict keys to
/// the parameter paths of this crate's backbone of `kind`.
///
/// Keys no rule matches (the classifier / `fc` top, `num_batches_tracked`)
/// have no counterpart and are ignored by the recorder.
pub fn torchvision_key_remap(kind: BackboneKind) -> Vec<(String, String)> {
    let mut rules = Vec::new();
    match kind {
        BackboneKind::MobileNetV3Small => {
            conv_norm(&mut rules, r"features\.0", "stem");
            for (i, (expand, squeeze_excite)) in block_layout().into_iter().enumerate() {
                let from = |stage: usize| format!(r"features\.{}\.block\.{}", i + 1, stage);
                let to = |part: &str| format!("blocks.{}.{}", i, part);
                let mut stage = 0;
                if expand {
                    conv_norm(&mut rules, &from(stage), &to("expand"));
                    stage += 1;
                }
                conv_norm(&mut rules, &from(stage), &to("depthwise"));
                stage += 1;
                if squeeze_excite {
                    for (torch, ours) in [("fc1", "reduce"), ("fc2", "expand")] {
                        rules.push((
                            format!(r"^{}\.{}\.(.+)$", from(stage), torch),
                            format!("{}.{}.$1", to("squeeze_excite"), ours),
                        ));
                    }
                    stage += 1;
                }
                conv_norm(&mut rules, &from(stage), &to("project"));
            }
            conv_norm(&mut rules, r"features\.12", "head");
        }
        BackboneKind::ResNet18 => {
            rules.push((r"^conv1\.(.+)$".into(), "stem.conv.$1".into()));
            rules.push((r"^bn1\.(.+)$".into(), "stem.norm.$1".into()));
            for layer in 1..=4 {
                for block in 0..2 {
                    let from = format!(r"layer{}\.{}", layer, block);
                    let to = format!("blocks.{}", (layer - 1) * 2 + block);
                    for (torch, ours) in [
                        ("conv1", "conv1.conv"),
                        ("bn1", "conv1.norm"),
                        ("conv2", "conv2.conv"),
                        ("bn2", "conv2.norm"),
                        (r"downsample\.0", "downsample.conv"),
                        (r"downsample\.1", "downsample.norm"),
                    ] {
                        rules.push((
                            format!(r"^{}\.{}\.(.+)$", from, torch),
                            format!("{}.{}.$1", to, ours),
                        ));
                    }
                }
            }
        }
    }
    rules
}

/// torchvision wraps conv + batch norm in a `Sequential`: `.0` conv, `.1` norm
fn conv_norm(rules: &mut Vec<(String, String)>, from: &str, to: &str) {
    rules.push((format!(r"^{}\.0\.(.+)$", from), format!("{}.conv.$1", to)));
    rules.push((format!(r"^{}\.1\.(.+)$", from), format!("{}.norm.$1", to)));
}

/// Read a torchvision checkpoint into a backbone of `kind`
pub fn import_torchvision<B: Backend>(
    kind: BackboneKind,
    path: &Path,
    device: &B::Device,
) -> Result<Backbone<B>> {
    if !path.is_file() {
        return Err(PlantDoctorError::Model(format!(
            "pretrained {} checkpoint not found at {:?}",
            kind, path
        )));
    }

    let rules = torchvision_key_remap(kind);
    debug!("Remapping {} checkpoint keys with {} rules", kind, rules.len());
    let args = rules
        .iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        });

    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
    let read_error = |e: burn::record::RecorderError| {
        PlantDoctorError::Model(format!(
            "failed to import {} checkpoint {:?}: {}",
            kind, path, e
        ))
    };

    let backbone = match kind {
        BackboneKind::MobileNetV3Small => {
            let record: MobileNetV3SmallRecord<B> =
                Recorder::<B>::load(&recorder, args, device).map_err(read_error)?;
            Backbone::MobileNetV3Small(MobileNetV3Small::new(device).load_record(record))
        }
        BackboneKind::ResNet18 => {
            let record: ResNet18Record<B> =
                Recorder::<B>::load(&recorder, args, device).map_err(read_error)?;
            Backbone::ResNet18(ResNet18::new(device).load_record(record))
        }
    };

    info!("Imported {} weights from {:?}", kind, path);
    Ok(backbone)
}

/// Write `backbone` as a burn record at `path` (the `.mpk` extension is forced)
pub fn save_backbone_weights<B: Backend>(backbone: &Backbone<B>, path: &Path) -> Result<PathBuf> {
    let file = path.with_extension("mpk");
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PlantDoctorError::persistence(&file, e))?;
    }
    backbone
        .clone()
        .save_file(file.clone(), &CompactRecorder::new())
        .map_err(|e| PlantDoctorError::persistence(&file, e))?;
    info!("Saved {} backbone weights to {:?}", backbone.kind(), file);
    Ok(file)
}

/// Load pretrained weights of any accepted format into `backbone`.
///
/// A record of a different backbone kind is rejected instead of being applied.
pub fn load_backbone_weights<B: Backend>(
    backbone: Backbone<B>,
    path: &Path,
    device: &B::Device,
) -> Result<Backbone<B>> {
    let kind = backbone.kind();
    if is_torch_checkpoint(path) {
        return import_torchvision(kind, path, device);
    }

    let file = path.with_extension("mpk");
    if !file.is_file() {
        return Err(PlantDoctorError::Model(format!(
            "pretrained {} weights not found at {:?}",
            kind, file
        )));
    }

    let record: BackboneRecord<B> =
        Recorder::<B>::load(&CompactRecorder::new(), file.clone(), device).map_err(|e| {
            PlantDoctorError::Model(format!(
                "failed to read pretrained {} weights from {:?}: {}",
                kind, file, e
            ))
        })?;

    let record_kind = match &record {
        BackboneRecord::MobileNetV3Small(_) => BackboneKind::MobileNetV3Small,
        BackboneRecord::ResNet18(_) => BackboneKind::ResNet18,
    };
    if record_kind != kind {
        return Err(PlantDoctorError::Model(format!(
            "{:?} holds {} weights but the configured backbone is {}",
            file, record_kind, kind
        )));
    }

    info!("Loaded pretrained {} weights from {:?}", kind, file);
    Ok(backbone.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorCategory;
    use burn::backend::NdArray;
    use regex::Regex;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    /// Apply the rules in order, the way the recorder does
    fn remap(kind: BackboneKind, key: &str) -> String {
        torchvision_key_remap(kind)
            .iter()
            .fold(key.to_string(), |key, (pattern, replacement)| {
                Regex::new(pattern)
                    .unwrap()
                    .replace_all(&key, replacement.as_str())
                    .into_owned()
            })
    }

    #[test]
    fn test_mobilenet_key_remap() {
        let kind = BackboneKind::MobileNetV3Small;
        let cases = [
            ("features.0.0.weight", "stem.conv.weight"),
            ("features.0.1.running_mean", "stem.norm.running_mean"),
            ("features.1.block.0.0.weight", "blocks.0.depthwise.conv.weight"),
            ("features.1.block.1.fc1.bias", "blocks.0.squeeze_excite.reduce.bias"),
            ("features.1.block.2.1.weight", "blocks.0.project.norm.weight"),
            ("features.2.block.0.0.weight", "blocks.1.expand.conv.weight"),
            ("features.2.block.2.1.running_var", "blocks.1.project.norm.running_var"),
            ("features.4.block.2.fc2.weight", "blocks.3.squeeze_excite.expand.weight"),
            ("features.4.block.3.0.weight", "blocks.3.project.conv.weight"),
            ("features.11.block.1.1.bias", "blocks.10.depthwise.norm.bias"),
            ("features.12.0.weight", "head.conv.weight"),
            ("features.12.1.bias", "head.norm.bias"),
            ("classifier.0.weight", "classifier.0.weight"),
        ];
        for (torch, ours) in cases {
            assert_eq!(remap(kind, torch), ours, "{torch}");
        }
    }

    #[test]
    fn test_resnet_key_remap() {
        let kind = BackboneKind::ResNet18;
        let cases = [
            ("conv1.weight", "stem.conv.weight"),
            ("bn1.bias", "stem.norm.bias"),
            ("layer1.0.conv1.weight", "blocks.0.conv1.conv.weight"),
            ("layer1.1.bn2.running_mean", "blocks.1.conv2.norm.running_mean"),
            ("layer3.1.bn1.weight", "blocks.5.conv1.norm.weight"),
            ("layer4.0.downsample.0.weight", "blocks.6.downsample.conv.weight"),
            ("layer4.0.downsample.1.running_var", "blocks.6.downsample.norm.running_var"),
            ("layer4.1.conv2.weight", "blocks.7.conv2.conv.weight"),
            ("fc.weight", "fc.weight"),
        ];
        for (torch, ours) in cases {
            assert_eq!(remap(kind, torch), ours, "{torch}");
        }
    }

    #[test]
    fn test_checkpoint_detection() {
        assert!(is_torch_checkpoint(Path::new("resnet18-f37072fd.pth")));
        assert!(is_torch_checkpoint(Path::new("weights/mobilenet.pt")));
        assert!(!is_torch_checkpoint(Path::new("mobilenet_v3_small.mpk")));
        assert!(!is_torch_checkpoint(Path::new("mobilenet_v3_small")));
    }

    #[test]
    fn test_missing_checkpoint() {
        let err = import_torchvision::<TestBackend>(
            BackboneKind::ResNet18,
            Path::new("/nonexistent/resnet18.pth"),
            &Default::default(),
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ModelConstruction);
    }

    #[test]
    fn test_corrupt_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mobilenet_v3_small.pth");
        std::fs::write(&path, b"not a zip archive").unwrap();
        let err = import_torchvision::<TestBackend>(
            BackboneKind::MobileNetV3Small,
            &path,
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlantDoctorError::Model(_)));
    }

    #[test]
    fn test_saved_weights_reload() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let source = BackboneKind::ResNet18.init::<TestBackend>(&device);
        let file = save_backbone_weights(&source, &dir.path().join("resnet18.pth")).unwrap();
        assert_eq!(file, dir.path().join("resnet18.mpk"));

        let loaded = load_backbone_weights(
            BackboneKind::ResNet18.init::<TestBackend>(&device),
            &file,
            &device,
        )
        .unwrap();
        assert_eq!(loaded.kind(), BackboneKind::ResNet18);
        assert_eq!(loaded.num_params(), source.num_params());
    }
}
