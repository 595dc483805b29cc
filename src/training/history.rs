//! Run phase and per-epoch history

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PlantDoctorError, Result};

/// Where a training run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    NotStarted,
    /// Executing epoch `epoch` (0-based)
    Running { epoch: usize },
    Completed,
}

/// Loss and accuracy of one epoch on both subsets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub duration_secs: f64,
}

/// State of one run: phase plus the metrics recorded so far
#[derive(Debug, Clone)]
pub struct TrainingRun {
    phase: RunPhase,
    total_epochs: usize,
    history: Vec<EpochMetrics>,
}

impl TrainingRun {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            phase: RunPhase::NotStarted,
            total_epochs,
            history: Vec::with_capacity(total_epochs),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[EpochMetrics] {
        &self.history
    }

    /// `NotStarted` or the previous epoch finished -> `Running { epoch }`
    pub fn begin_epoch(&mut self, epoch: usize) -> Result<()> {
        let expected = self.history.len();
        let ready = match self.phase {
            RunPhase::NotStarted => epoch == 0,
            RunPhase::Running { epoch: current } => current + 1 == epoch && expected == epoch,
            RunPhase::Completed => false,
        };
        if !ready || epoch >= self.total_epochs {
            return Err(self.invalid_transition(epoch, "begin epoch"));
        }
        self.phase = RunPhase::Running { epoch };
        Ok(())
    }

    /// Record the metrics of the running epoch
    pub fn finish_epoch(&mut self, metrics: EpochMetrics) -> Result<()> {
        match self.phase {
            RunPhase::Running { epoch } if self.history.len() == epoch => {
                self.history.push(metrics);
                Ok(())
            }
            _ => Err(self.invalid_transition(metrics.epoch, "finish epoch")),
        }
    }

    /// Last epoch recorded -> `Completed`
    pub fn complete(&mut self) -> Result<()> {
        match self.phase {
            RunPhase::Running { epoch }
                if epoch + 1 == self.total_epochs && self.history.len() == self.total_epochs =>
            {
                self.phase = RunPhase::Completed;
                Ok(())
            }
            _ => Err(self.invalid_transition(self.history.len(), "complete")),
        }
    }

    pub fn report(&self) -> TrainingReport {
        TrainingReport {
            epochs: self.history.clone(),
        }
    }

    fn invalid_transition(&self, epoch: usize, action: &str) -> PlantDoctorError {
        PlantDoctorError::Training {
            epoch,
            reason: format!("cannot {} while {:?}", action, self.phase),
        }
    }
}

/// Per-epoch history of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingReport {
    pub fn final_metrics(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// Write the history as pretty JSON
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PlantDoctorError::persistence(path, e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PlantDoctorError::persistence(path, e))?;
        }
        std::fs::write(path, json).map_err(|e| PlantDoctorError::persistence(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics(epoch: usize) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 1.0 / epoch as f64,
            train_accuracy: 0.5,
            val_loss: 1.2,
            val_accuracy: 0.4,
            duration_secs: 0.1,
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut run = TrainingRun::new(2);
        assert_eq!(run.phase(), RunPhase::NotStarted);

        run.begin_epoch(0).unwrap();
        assert_eq!(run.phase(), RunPhase::Running { epoch: 0 });
        run.finish_epoch(metrics(1)).unwrap();

        run.begin_epoch(1).unwrap();
        run.finish_epoch(metrics(2)).unwrap();
        run.complete().unwrap();
        assert_eq!(run.phase(), RunPhase::Completed);

        let report = run.report();
        assert_eq!(report.epochs.len(), 2);
        assert_eq!(report.final_metrics().unwrap().epoch, 2);
    }

    #[test]
    fn test_rejects_out_of_order_transitions() {
        let mut run = TrainingRun::new(2);
        assert!(run.begin_epoch(1).is_err());
        assert!(run.complete().is_err());

        run.begin_epoch(0).unwrap();
        // next epoch cannot start before this one is recorded
        assert!(run.begin_epoch(1).is_err());
        assert!(run.complete().is_err());

        run.finish_epoch(metrics(1)).unwrap();
        assert!(run.finish_epoch(metrics(1)).is_err());
        assert!(run.begin_epoch(2).is_err());
    }

    #[test]
    fn test_save_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports/history.json");
        let report = TrainingReport {
            epochs: vec![metrics(1), metrics(2)],
        };
        report.save_json(&path).unwrap();

        let loaded: TrainingReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }
}
