//! Streaming pipeline
//!
//! Wraps a `Subset` with caching, shuffling and prefetching so batch
//! preparation overlaps with model computation. Each call to
//! `SubsetStream::epoch` yields one full pass as batches of decoded items.
//! Decoding inside a batch runs in parallel on the rayon pool.

pub mod cache;
pub mod prefetch;
pub mod shuffle;

pub use cache::SampleCache;
pub use prefetch::{PrefetchDepth, Prefetcher};
pub use shuffle::ShuffleBuffer;

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::StreamingConfig;
use crate::dataset::{ImageBatcher, ImageItem, Subset};
use crate::utils::error::Result;

/// Subset plus decoded-sample cache, shared with the prefetch thread
struct StreamSource {
    subset: Subset,
    cache: SampleCache,
}

impl StreamSource {
    fn load_batch(&self, indices: &[usize]) -> Result<Vec<ImageItem>> {
        indices
            .par_iter()
            .map(|&i| self.cache.get_or_decode(i, || self.subset.decode(i)))
            .collect()
    }
}

/// A subset prepared for repeated epochs
pub struct SubsetStream {
    source: Arc<StreamSource>,
    batch_size: usize,
    shuffle: Option<(ShuffleBuffer, ChaCha8Rng)>,
    prefetch_depth: usize,
    epochs_started: usize,
}

impl SubsetStream {
    /// Stream for training: shuffled every epoch with an RNG seeded once
    pub fn training(subset: Subset, batch_size: usize, config: &StreamingConfig, seed: u64) -> Self {
        let shuffle = (
            ShuffleBuffer::new(config.shuffle_buffer),
            ChaCha8Rng::seed_from_u64(seed),
        );
        Self::new(subset, batch_size, config, Some(shuffle))
    }

    /// Stream for validation: loader order, never shuffled
    pub fn validation(subset: Subset, batch_size: usize, config: &StreamingConfig) -> Self {
        Self::new(subset, batch_size, config, None)
    }

    fn new(
        subset: Subset,
        batch_size: usize,
        config: &StreamingConfig,
        shuffle: Option<(ShuffleBuffer, ChaCha8Rng)>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let batch_bytes = ImageBatcher::new(subset.image_size()).batch_bytes(batch_size);
        let prefetch_depth = config
            .prefetch
            .resolve(batch_bytes, config.prefetch_budget_mb * 1024 * 1024);
        let cache = if config.cache {
            SampleCache::new(subset.len())
        } else {
            SampleCache::disabled()
        };

        debug!(
            "Stream over {} samples: batch {}, shuffle {:?}, prefetch depth {}, cache {}",
            subset.len(),
            batch_size,
            shuffle.as_ref().map(|(b, _)| b.capacity()),
            prefetch_depth,
            config.cache
        );

        Self {
            source: Arc::new(StreamSource { subset, cache }),
            batch_size,
            shuffle,
            prefetch_depth,
            epochs_started: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.source.subset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.source.subset.num_batches(self.batch_size)
    }

    pub fn prefetch_depth(&self) -> usize {
        self.prefetch_depth
    }

    /// Samples currently held by the cache
    pub fn cached_samples(&self) -> usize {
        self.source.cache.cached()
    }

    /// Images decoded from storage so far
    pub fn decoded_samples(&self) -> usize {
        self.source.cache.decodes()
    }

    /// Sample order for the next epoch
    fn next_order(&mut self) -> Vec<usize> {
        let indices = 0..self.len();
        match self.shuffle.as_mut() {
            Some((buffer, rng)) => buffer.shuffle(indices, rng),
            None => indices.collect(),
        }
    }

    /// Begin one pass over the subset
    pub fn epoch(&mut self) -> Result<EpochBatches> {
        let order = self.next_order();
        self.epochs_started += 1;
        if self.epochs_started == 2 && self.source.cache.is_enabled() {
            info!(
                "Cache holds {}/{} decoded samples",
                self.source.cache.cached(),
                self.len()
            );
        }

        let chunks: Vec<Vec<usize>> = order.chunks(self.batch_size).map(<[usize]>::to_vec).collect();
        let source = Arc::clone(&self.source);
        let batches = chunks.into_iter().map(move |chunk| source.load_batch(&chunk));

        if self.prefetch_depth == 0 {
            return Ok(EpochBatches::Inline(Box::new(batches)));
        }

        Ok(EpochBatches::Prefetched(Prefetcher::spawn(
            batches,
            self.prefetch_depth,
        )?))
    }
}

/// The batches of one epoch, in production order
pub enum EpochBatches {
    Inline(Box<dyn Iterator<Item = Result<Vec<ImageItem>>> + Send>),
    Prefetched(Prefetcher<Vec<ImageItem>>),
}

impl Iterator for EpochBatches {
    type Item = Result<Vec<ImageItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EpochBatches::Inline(batches) => batches.next(),
            EpochBatches::Prefetched(prefetcher) => prefetcher.next(),
        }
    }
}
