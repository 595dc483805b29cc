//! Supervised training loop
//!
//! Each epoch runs every training batch through
//! `frozen backbone -> head -> cross-entropy -> backward -> Adam step`, then
//! evaluates every validation batch without updating anything.
//!
//! The backbone is evaluated on the inner (non-autodiff) backend, so batch
//! norm stays in inference mode and its output enters the autodiff graph as a
//! constant. Gradients can only reach the head, and only the head is given to
//! the optimizer.

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use super::history::{EpochMetrics, RunPhase, TrainingReport, TrainingRun};
use super::metrics::{count_correct, EpochAccumulator};
use crate::config::TrainingConfig;
use crate::dataset::{ImageBatch, ImageBatcher};
use crate::model::{Backbone, ClassifierHead, PlantDoctorModel};
use crate::streaming::SubsetStream;
use crate::utils::error::{PlantDoctorError, Result};
use crate::utils::TrainingLogger;

/// Drives one training run
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    batcher: ImageBatcher,
    device: B::Device,
    run: TrainingRun,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: &TrainingConfig, image_size: usize, device: B::Device) -> Self {
        Self {
            config: config.clone(),
            batcher: ImageBatcher::new(image_size),
            device,
            run: TrainingRun::new(config.epochs),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.run.phase()
    }

    /// Metrics of the epochs finished so far
    pub fn history(&self) -> &[EpochMetrics] {
        self.run.history()
    }

    /// Train the head of `model` for the configured number of epochs.
    ///
    /// Any batch failure aborts the run. On success the trained model and
    /// the per-epoch history are returned.
    pub fn fit(
        &mut self,
        model: PlantDoctorModel<B>,
        training: &mut SubsetStream,
        validation: &mut SubsetStream,
    ) -> Result<(PlantDoctorModel<B>, TrainingReport)> {
        if training.is_empty() || validation.is_empty() {
            return Err(PlantDoctorError::Training {
                epoch: 0,
                reason: "training and validation streams must both be non-empty".into(),
            });
        }

        let epochs = self.config.epochs;
        info!(
            "Training for {} epochs: {} training batches, {} validation batches, lr {}",
            epochs,
            training.num_batches(),
            validation.num_batches(),
            self.config.learning_rate
        );

        let PlantDoctorModel { backbone, mut head } = model;
        let frozen = backbone.valid();
        let mut optimizer = AdamConfig::new().init::<B, ClassifierHead<B>>();
        let mut logger = TrainingLogger::new(epochs);

        for epoch in 0..epochs {
            self.run.begin_epoch(epoch)?;
            logger.start_epoch(epoch);

            let (trained, train) =
                self.train_epoch(epoch, &frozen, head, &mut optimizer, training)?;
            head = trained;
            let valid = self.validate_epoch(epoch, &frozen, &head.valid(), validation)?;

            let duration_secs =
                logger.end_epoch(train.loss(), train.accuracy(), valid.loss(), valid.accuracy());
            self.run.finish_epoch(EpochMetrics {
                epoch: epoch + 1,
                train_loss: train.loss(),
                train_accuracy: train.accuracy(),
                val_loss: valid.loss(),
                val_accuracy: valid.accuracy(),
                duration_secs,
            })?;
        }

        self.run.complete()?;
        logger.log_complete(self.run.history().last().map(|m| m.val_accuracy));

        Ok((PlantDoctorModel { backbone, head }, self.run.report()))
    }

    fn train_epoch<O>(
        &self,
        epoch: usize,
        frozen: &Backbone<B::InnerBackend>,
        mut head: ClassifierHead<B>,
        optimizer: &mut O,
        stream: &mut SubsetStream,
    ) -> Result<(ClassifierHead<B>, EpochAccumulator)>
    where
        O: Optimizer<ClassifierHead<B>, B>,
    {
        let progress = self.progress_bar(stream.num_batches(), epoch, "train");
        let mut acc = EpochAccumulator::default();

        for items in stream.epoch()? {
            let items = items?;
            let batch_size = items.len();
            let batch: ImageBatch<B> = self.batcher.batch(items, &self.device);

            // Forward
            let features = Tensor::<B, 4>::from_inner(frozen.forward(batch.images.inner()));
            let logits = head.forward(features);
            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.targets.clone());
            let mean_loss = finite_loss(epoch, loss.clone().into_scalar().elem())?;
            let correct = count_correct(logits.inner(), batch.targets.inner());

            // Update
            let grads = GradientsParams::from_grads(loss.backward(), &head);
            head = optimizer.step(self.config.learning_rate, head, grads);

            acc.record(mean_loss, correct, batch_size);
            progress.inc(1);
            debug!(
                "epoch {} batch {}: loss {:.4}, running accuracy {:.4}",
                epoch + 1,
                acc.batches(),
                mean_loss,
                acc.accuracy()
            );
        }

        progress.finish_and_clear();
        Ok((head, acc))
    }

    fn validate_epoch(
        &self,
        epoch: usize,
        frozen: &Backbone<B::InnerBackend>,
        head: &ClassifierHead<B::InnerBackend>,
        stream: &mut SubsetStream,
    ) -> Result<EpochAccumulator> {
        let progress = self.progress_bar(stream.num_batches(), epoch, "valid");
        let mut acc = EpochAccumulator::default();

        for items in stream.epoch()? {
            let items = items?;
            let batch_size = items.len();
            let batch: ImageBatch<B> = self.batcher.batch(items, &self.device);
            let targets = batch.targets.inner();

            let logits = head.forward(frozen.forward(batch.images.inner()));
            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), targets.clone());
            let mean_loss = finite_loss(epoch, loss.into_scalar().elem())?;

            acc.record(mean_loss, count_correct(logits, targets), batch_size);
            progress.inc(1);
        }

        progress.finish_and_clear();
        Ok(acc)
    }

    fn progress_bar(&self, len: usize, epoch: usize, stage: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("  {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(format!("epoch {}/{} {}", epoch + 1, self.config.epochs, stage));
        bar
    }
}

/// Reject NaN and infinite losses
fn finite_loss(epoch: usize, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PlantDoctorError::Training {
            epoch: epoch + 1,
            reason: format!("loss became non-finite ({})", value),
        })
    }
}
