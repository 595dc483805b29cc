//! Plant Doctor CLI
//!
//! Entry point for training the plant disease classifier, inspecting a
//! dataset and reading back saved model artifacts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info, warn};

use plant_doctor::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use plant_doctor::model::{pretrained, BackboneKind};
use plant_doctor::streaming::PrefetchDepth;
use plant_doctor::utils::logging::{init_logging, LogConfig};
use plant_doctor::utils::{format_duration, format_number};
use plant_doctor::{load_artifact, preflight, prepare_dataset, train_model, PipelineConfig};

/// Plant Doctor: transfer-learning plant disease classification
///
/// Trains a classification head on top of a frozen pretrained backbone
/// using the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "plant-doctor")]
#[command(version)]
#[command(about = "Plant disease classifier training with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// TOML configuration file; CLI flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the classifier and write the model artifact
    Train(TrainArgs),

    /// Show class counts and the train/validation split of a dataset
    Stats {
        /// Path to the dataset directory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the manifest of a saved model artifact
    Inspect {
        /// Path to the artifact file
        artifact: PathBuf,
    },

    /// Convert a torchvision ImageNet checkpoint (.pth) into backbone weights
    ImportWeights {
        /// Backbone the checkpoint belongs to
        #[arg(short, long)]
        backbone: BackboneKind,

        /// torchvision checkpoint, e.g. mobilenet_v3_small-047dcff4.pth
        #[arg(short, long)]
        input: PathBuf,

        /// Output record (.mpk)
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Path to the dataset directory (<root>/<class_name>/<image_file>)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Output path of the model artifact
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of training epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size for training and validation
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Image size (square)
    #[arg(long)]
    image_size: Option<usize>,

    /// Fraction of samples held out for validation (0.0-1.0)
    #[arg(long)]
    validation_fraction: Option<f64>,

    /// Seed of the train/validation split and the shuffle
    #[arg(long)]
    seed: Option<u64>,

    /// Learning rate
    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// Backbone: mobilenet_v3_small or resnet18
    #[arg(long)]
    backbone: Option<BackboneKind>,

    /// Pretrained backbone weights: torchvision checkpoint (.pth) or converted record (.mpk)
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Train on a randomly initialized backbone when no weights are given
    #[arg(long, default_value = "false")]
    random_backbone: bool,

    /// Prefetch depth: auto, disabled, or a number of batches
    #[arg(long, value_parser = parse_prefetch)]
    prefetch: Option<PrefetchDepth>,

    /// Write the per-epoch history as JSON
    #[arg(long)]
    history: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long, default_value = "false")]
    no_progress: bool,

    /// Validate configuration and dataset discovery, then exit
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

impl TrainArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.data_dir {
            config.data.dataset_dir = dir.clone();
        }
        if let Some(output) = &self.output {
            config.output.artifact_path = output.clone();
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.data.batch_size = batch_size;
        }
        if let Some(image_size) = self.image_size {
            config.data.image_size = image_size;
        }
        if let Some(fraction) = self.validation_fraction {
            config.data.validation_fraction = fraction;
        }
        if let Some(seed) = self.seed {
            config.data.seed = seed;
        }
        if let Some(lr) = self.learning_rate {
            config.training.learning_rate = lr;
        }
        if let Some(backbone) = self.backbone {
            config.model.backbone = backbone;
        }
        if let Some(weights) = &self.weights {
            config.model.pretrained_weights = Some(weights.clone());
        }
        if self.random_backbone {
            config.model.allow_random_backbone = true;
        }
        if let Some(prefetch) = self.prefetch {
            config.streaming.prefetch = prefetch;
        }
        if let Some(history) = &self.history {
            config.output.history_path = Some(history.clone());
        }
        if self.no_progress {
            config.training.show_progress = false;
        }
    }
}

fn parse_prefetch(value: &str) -> std::result::Result<PrefetchDepth, String> {
    match value {
        "auto" => Ok(PrefetchDepth::Auto),
        "disabled" | "off" | "none" => Ok(PrefetchDepth::Disabled),
        n => n
            .parse::<usize>()
            .map(PrefetchDepth::Fixed)
            .map_err(|_| format!("expected auto, disabled or a batch count, got '{}'", n)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    if !cli.quiet {
        print_banner();
    }

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Train(args) => {
            args.apply(&mut config);
            if args.dry_run {
                cmd_dry_run(&config)?;
            } else {
                cmd_train(&config)?;
            }
        }

        Commands::Stats { data_dir } => {
            if let Some(dir) = data_dir {
                config.data.dataset_dir = dir;
            }
            cmd_stats(&config)?;
        }

        Commands::Inspect { artifact } => {
            cmd_inspect(&artifact)?;
        }

        Commands::ImportWeights {
            backbone,
            input,
            output,
        } => {
            cmd_import_weights(backbone, &input, &output)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==================================================================
    Plant Doctor
    Plant disease classification with Burn + Rust
 ==================================================================
  "#
        .green()
    );
}

fn cmd_train(config: &PipelineConfig) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Dataset:    {}", config.data.dataset_dir.display());
    println!("  Backbone:   {}", config.model.backbone);
    println!(
        "  Images:     {}x{}, batch size {}",
        config.data.image_size, config.data.image_size, config.data.batch_size
    );
    println!(
        "  Epochs:     {} (lr {})",
        config.training.epochs, config.training.learning_rate
    );
    println!("  Backend:    {}", backend_name());
    println!("  Artifact:   {}", config.output.artifact_path.display());
    println!();

    let trained = train_model::<TrainingBackend>(config, &default_device())
        .with_context(|| "training pipeline failed")?;

    let artifact_path = match trained.save(&config.output) {
        Ok(path) => path,
        Err(e) => {
            // The trained model is still in memory; try once more somewhere writable
            error!("{}", e);
            let mut fallback = config.output.clone();
            fallback.artifact_path = std::env::temp_dir().join(
                config
                    .output
                    .artifact_path
                    .file_name()
                    .unwrap_or_else(|| "plant_doctor_model.mpk".as_ref()),
            );
            fallback.history_path = None;
            warn!("Saving the trained model to {:?} instead", fallback.artifact_path);
            trained
                .save(&fallback)
                .with_context(|| format!("could not save the model: {}", e))?
        }
    };
    let outcome = trained.outcome(artifact_path);

    println!();
    println!("{}", "Training Summary:".cyan().bold());
    println!("  {}", outcome.summary);
    println!(
        "  {:>5}  {:>10}  {:>9}  {:>8}  {:>7}  {:>8}",
        "epoch", "train loss", "train acc", "val loss", "val acc", "time"
    );
    for m in &outcome.report.epochs {
        println!(
            "  {:>5}  {:>10.4}  {:>8.2}%  {:>8.4}  {:>6.2}%  {:>8}",
            m.epoch,
            m.train_loss,
            m.train_accuracy * 100.0,
            m.val_loss,
            m.val_accuracy * 100.0,
            format_duration(m.duration_secs)
        );
    }
    println!();
    println!(
        "{} Model saved to {}",
        "Done:".green().bold(),
        outcome.artifact_path.display()
    );
    Ok(())
}

fn cmd_dry_run(config: &PipelineConfig) -> Result<()> {
    let dataset = preflight(config)?;
    println!(
        "{} configuration valid, {} classes, {} training / {} validation samples",
        "Dry run:".yellow().bold(),
        dataset.vocabulary.len(),
        format_number(dataset.training.len()),
        format_number(dataset.validation.len())
    );
    Ok(())
}

fn cmd_stats(config: &PipelineConfig) -> Result<()> {
    info!(
        "Computing dataset statistics for: {}",
        config.data.dataset_dir.display()
    );

    let dataset = prepare_dataset(config)?;
    let stats = dataset.stats();

    println!("{}", "Dataset Statistics:".cyan().bold());
    println!("  Total samples:     {}", format_number(stats.total));
    println!("  Number of classes: {}", stats.classes.len());
    println!(
        "  Training set:      {} ({:.1}%)",
        format_number(stats.training),
        100.0 * stats.training as f64 / stats.total as f64
    );
    println!(
        "  Validation set:    {} ({:.1}%)",
        format_number(stats.validation),
        100.0 * stats.validation as f64 / stats.total as f64
    );
    println!();

    println!("{}", "Class Distribution:".cyan().bold());
    for (class_name, count) in &stats.classes {
        let pct = 100.0 * *count as f64 / stats.total as f64;
        println!("  {:40} {:>6} ({:>5.1}%)", class_name, count, pct);
    }
    Ok(())
}

fn cmd_import_weights(backbone: BackboneKind, input: &Path, output: &Path) -> Result<()> {
    let device = default_device();
    let weights = pretrained::import_torchvision::<DefaultBackend>(backbone, input, &device)?;
    let written = pretrained::save_backbone_weights(&weights, output)?;
    println!(
        "{} {} weights written to {}",
        "Imported:".green().bold(),
        backbone,
        written.display()
    );
    Ok(())
}

fn cmd_inspect(artifact: &Path) -> Result<()> {
    let (model, manifest) = load_artifact::<DefaultBackend>(artifact, &default_device())
        .with_context(|| format!("failed to read artifact {:?}", artifact))?;

    println!("{}", "Model Artifact:".cyan().bold());
    println!("  Path:           {}", artifact.display());
    println!("  Format version: {}", manifest.format_version);
    println!("  Created:        {}", manifest.created_at);
    println!("  Written by:     plant-doctor {}", manifest.crate_version);
    println!("  Backbone:       {}", manifest.model.backbone);
    println!(
        "  Input:          3x{}x{}",
        manifest.model.image_size, manifest.model.image_size
    );
    println!(
        "  Head:           Dense({}) -> Dropout({}) -> Dense({})",
        manifest.model.hidden_units, manifest.model.dropout, manifest.model.num_classes
    );
    println!("  {}", model.summary());

    if let Some(m) = &manifest.final_metrics {
        println!(
            "  Final epoch:    {} (val loss {:.4}, val acc {:.2}%)",
            m.epoch,
            m.val_loss,
            m.val_accuracy * 100.0
        );
    }

    println!();
    println!("{}", "Classes:".cyan().bold());
    for (idx, name) in manifest.class_names.iter().enumerate() {
        println!("  {:>3}  {}", idx, name);
    }
    Ok(())
}
