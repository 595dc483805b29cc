//! Loss and accuracy accumulation over an epoch

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};

/// Number of rows whose arg-max matches the target
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = logits.argmax(1).flatten::<1>(0, 1);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Sample-weighted running loss and accuracy
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochAccumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
    batches: usize,
}

impl EpochAccumulator {
    /// Add one batch; `mean_loss` is the batch's average per-sample loss
    pub fn record(&mut self, mean_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += mean_loss * batch_size as f64;
        self.correct += correct;
        self.samples += batch_size;
        self.batches += 1;
    }

    pub fn loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.correct as f64 / self.samples as f64
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn batches(&self) -> usize {
        self.batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    #[test]
    fn test_count_correct() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.1f32, 0.9, 0.8, 0.2, 0.3, 0.7], [3, 2]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![1i64, 1, 1], [3]), &device);
        assert_eq!(count_correct(logits, targets), 2);
    }

    #[test]
    fn test_sample_weighted_mean() {
        let mut acc = EpochAccumulator::default();
        acc.record(1.0, 32, 32);
        acc.record(4.0, 0, 16);
        assert!((acc.loss() - 2.0).abs() < 1e-12);
        assert!((acc.accuracy() - 32.0 / 48.0).abs() < 1e-12);
        assert_eq!(acc.samples(), 48);
        assert_eq!(acc.batches(), 2);
    }

    #[test]
    fn test_empty() {
        let acc = EpochAccumulator::default();
        assert_eq!(acc.loss(), 0.0);
        assert_eq!(acc.accuracy(), 0.0);
    }
}
