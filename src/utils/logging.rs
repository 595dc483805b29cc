//! Logging Module
//!
//! Structured logging through `tracing`, plus a small helper that reports
//! epoch boundaries and timings while the trainer runs.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use super::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to include the module path of each event
    pub include_target: bool,
    /// Whether to include thread IDs (useful to see the prefetch producer)
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug-level output with targets and thread IDs
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Directive used when `RUST_LOG` is not set
    fn default_directive(&self) -> String {
        format!("plant_doctor={}", self.level).to_lowercase()
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when present.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Reports epoch start/end with timings
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (0-based index)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::info!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch and return its wall-clock duration in seconds
    pub fn end_epoch(
        &self,
        train_loss: f64,
        train_accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
    ) -> f64 {
        let epoch_secs = self.epoch_start.elapsed().as_secs_f64();
        let avg_epoch_secs = self.training_start.elapsed().as_secs_f64() / (self.epoch + 1) as f64;
        let remaining = self.total_epochs.saturating_sub(self.epoch + 1);

        tracing::info!(
            "Epoch {}/{} completed in {} | loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} | ETA: {}",
            self.epoch + 1,
            self.total_epochs,
            format_duration(epoch_secs),
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
            format_duration(remaining as f64 * avg_epoch_secs)
        );

        epoch_secs
    }

    /// Log training completion
    pub fn log_complete(&self, final_val_accuracy: Option<f64>) {
        let total = format_duration(self.training_start.elapsed().as_secs_f64());
        match final_val_accuracy {
            Some(acc) => tracing::info!(
                "Training complete: {} epochs in {} | final val_accuracy: {:.2}%",
                self.total_epochs,
                total,
                acc * 100.0
            ),
            None => tracing::info!("Training complete: {} epochs in {}", self.total_epochs, total),
        }
    }
}
