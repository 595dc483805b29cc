//! In-memory cache of decoded samples
//!
//! One write-once slot per sample. The prefetch thread fills slots during the
//! first pass; every later pass reads them back without touching storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::dataset::ImageItem;
use crate::utils::error::Result;

pub struct SampleCache {
    slots: Option<Vec<OnceLock<ImageItem>>>,
    decodes: AtomicUsize,
}

impl SampleCache {
    /// Cache with one slot per sample
    pub fn new(len: usize) -> Self {
        Self {
            slots: Some((0..len).map(|_| OnceLock::new()).collect()),
            decodes: AtomicUsize::new(0),
        }
    }

    /// Pass-through that decodes on every request
    pub fn disabled() -> Self {
        Self {
            slots: None,
            decodes: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.slots.is_some()
    }

    /// Return the cached item at `index`, running `decode` on a miss
    pub fn get_or_decode<F>(&self, index: usize, decode: F) -> Result<ImageItem>
    where
        F: FnOnce() -> Result<ImageItem>,
    {
        let slot = self.slots.as_ref().map(|slots| &slots[index]);
        if let Some(item) = slot.and_then(OnceLock::get) {
            return Ok(item.clone());
        }

        let item = decode()?;
        self.decodes.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = slot {
            // A concurrent decode of the same index may have won; both are identical.
            let _ = slot.set(item.clone());
        }
        Ok(item)
    }

    /// Number of filled slots
    pub fn cached(&self) -> usize {
        self.slots
            .as_ref()
            .map(|slots| slots.iter().filter(|s| s.get().is_some()).count())
            .unwrap_or(0)
    }

    /// Total decodes performed through this cache
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }
}
