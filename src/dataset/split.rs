//! Deterministic train/validation partition
//!
//! All samples are permuted once with a ChaCha8 RNG seeded by the split
//! seed. The last `floor(n * validation_fraction)` samples of the permutation
//! form the validation subset and the rest form the training subset, so both
//! come from the same permutation and never overlap.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::loader::ImageSample;
use crate::utils::error::{PlantDoctorError, Result};

/// Configuration for the partition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of samples held out for validation, in (0, 1)
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 123,
        }
    }
}

impl SplitConfig {
    pub fn new(validation_fraction: f64, seed: u64) -> Result<Self> {
        if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
            return Err(PlantDoctorError::Config(format!(
                "validation_fraction must lie in (0, 1), got {}",
                validation_fraction
            )));
        }
        Ok(Self {
            validation_fraction,
            seed,
        })
    }

    /// Number of validation samples out of `total`
    pub fn validation_len(&self, total: usize) -> usize {
        (total as f64 * self.validation_fraction).floor() as usize
    }
}

/// Training and validation samples
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub training: Vec<ImageSample>,
    pub validation: Vec<ImageSample>,
}

impl DatasetSplit {
    pub fn len(&self) -> usize {
        self.training.len() + self.validation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition `samples` according to `config`
pub fn split_samples(samples: &[ImageSample], config: &SplitConfig) -> DatasetSplit {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut shuffled = samples.to_vec();
    shuffled.shuffle(&mut rng);

    let validation_len = config.validation_len(shuffled.len());
    let validation = shuffled.split_off(shuffled.len() - validation_len);

    DatasetSplit {
        training: shuffled,
        validation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn samples(n: usize, classes: usize) -> Vec<ImageSample> {
        (0..n)
            .map(|i| ImageSample {
                path: PathBuf::from(format!("class_{}/img_{:04}.jpg", i % classes, i)),
                label: i % classes,
            })
            .collect()
    }

    #[test]
    fn test_sizes() {
        let split = split_samples(&samples(300, 3), &SplitConfig::default());
        assert_eq!(split.training.len(), 240);
        assert_eq!(split.validation.len(), 60);
    }

    #[test]
    fn test_floor_of_fraction() {
        let config = SplitConfig::new(0.25, 7).unwrap();
        let split = split_samples(&samples(10, 2), &config);
        assert_eq!(split.validation.len(), 2);
        assert_eq!(split.training.len(), 8);
    }

    #[test]
    fn test_deterministic() {
        let data = samples(97, 4);
        let a = split_samples(&data, &SplitConfig::default());
        let b = split_samples(&data, &SplitConfig::default());
        assert_eq!(a.training, b.training);
        assert_eq!(a.validation, b.validation);

        let other = split_samples(&data, &SplitConfig::new(0.2, 124).unwrap());
        assert_ne!(a.validation, other.validation);
    }

    #[test]
    fn test_disjoint_and_covering() {
        let data = samples(123, 5);
        for fraction in [0.01, 0.2, 0.5, 0.77, 0.99] {
            let split = split_samples(&data, &SplitConfig::new(fraction, 123).unwrap());
            let train: HashSet<_> = split.training.iter().map(|s| &s.path).collect();
            let valid: HashSet<_> = split.validation.iter().map(|s| &s.path).collect();

            assert!(train.is_disjoint(&valid), "fraction {fraction}");
            assert_eq!(train.len() + valid.len(), data.len(), "fraction {fraction}");
            assert_eq!(split.len(), data.len());
        }
    }

    #[test]
    fn test_fraction_bounds() {
        assert!(SplitConfig::new(0.0, 1).is_err());
        assert!(SplitConfig::new(1.0, 1).is_err());
        assert!(SplitConfig::new(f64::NAN, 1).is_err());
        assert!(SplitConfig::new(0.5, 1).is_ok());
    }

    #[test]
    fn test_empty_input() {
        let split = split_samples(&[], &SplitConfig::default());
        assert!(split.is_empty());
    }
}
