//! Background read-ahead of batches
//!
//! A producer thread runs the batch iterator and pushes results into a
//! bounded channel. The consumer pulls from the other end, so at most
//! `depth` prepared batches sit in memory at once.

use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::error::Result;

/// How many batches to prepare ahead of the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchDepth {
    /// Available parallelism, capped by the configured byte budget
    Auto,
    Fixed(usize),
    /// Prepare batches on the consumer thread
    Disabled,
}

impl PrefetchDepth {
    /// Resolve to a concrete depth. `0` means no background thread.
    pub fn resolve(self, batch_bytes: usize, budget_bytes: usize) -> usize {
        match self {
            PrefetchDepth::Disabled => 0,
            PrefetchDepth::Fixed(n) => n,
            PrefetchDepth::Auto => {
                let parallelism = thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2);
                let cap = if batch_bytes == 0 {
                    parallelism
                } else {
                    (budget_bytes / batch_bytes).max(1)
                };
                if parallelism > cap {
                    debug!(
                        "Capping prefetch depth from {} to {} by a {} byte budget (~{} bytes/batch)",
                        parallelism, cap, budget_bytes, batch_bytes
                    );
                }
                parallelism.min(cap).max(1)
            }
        }
    }
}

/// Iterator over batches produced on a background thread
pub struct Prefetcher<T: Send + 'static> {
    receiver: Option<Receiver<Result<T>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Prefetcher<T> {
    /// Spawn a producer draining `source` into a channel of capacity `depth`.
    ///
    /// The producer stops after forwarding the first error, or as soon as
    /// the consumer side is dropped.
    pub fn spawn<I>(source: I, depth: usize) -> std::io::Result<Self>
    where
        I: Iterator<Item = Result<T>> + Send + 'static,
    {
        let (sender, receiver) = sync_channel(depth.max(1));
        let handle = thread::Builder::new()
            .name("batch-prefetch".to_string())
            .spawn(move || {
                for item in source {
                    let failed = item.is_err();
                    if sender.send(item).is_err() {
                        debug!("Prefetch consumer went away, stopping producer");
                        return;
                    }
                    if failed {
                        return;
                    }
                }
            })?;

        Ok(Self {
            receiver: Some(receiver),
            handle: Some(handle),
        })
    }
}

impl<T: Send + 'static> Iterator for Prefetcher<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl<T: Send + 'static> Drop for Prefetcher<T> {
    fn drop(&mut self) {
        // Closing the channel first unblocks a producer waiting on a full buffer.
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Prefetch producer thread panicked");
            }
        }
    }
}
