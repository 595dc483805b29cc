//! Bounded shuffle buffer
//!
//! Fills a buffer with the first `capacity` elements; each following element
//! replaces a uniformly chosen buffered one, which is emitted. Once the input
//! is exhausted the remaining buffer drains in random order. With a capacity
//! at least as large as the input this is a full uniform shuffle.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

pub struct ShuffleBuffer {
    capacity: usize,
}

impl ShuffleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reorder `input`, advancing `rng`
    pub fn shuffle<T>(&self, input: impl IntoIterator<Item = T>, rng: &mut ChaCha8Rng) -> Vec<T> {
        let mut input = input.into_iter();
        let mut buffer: Vec<T> = input.by_ref().take(self.capacity).collect();
        let mut output = Vec::with_capacity(buffer.len());

        for incoming in input {
            let slot = rng.gen_range(0..buffer.len());
            output.push(std::mem::replace(&mut buffer[slot], incoming));
        }
        while !buffer.is_empty() {
            let slot = rng.gen_range(0..buffer.len());
            output.push(buffer.swap_remove(slot));
        }
        output
    }
}
