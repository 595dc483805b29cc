//! Turning decoded samples into tensors

use std::path::PathBuf;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

/// A decoded sample: CHW pixels in 0-255 plus its label
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// `3 * H * W` bytes, shared so cache hits do not copy pixel data
    pub pixels: Arc<[u8]>,
    pub label: usize,
    pub path: PathBuf,
}

/// A batch ready for the model
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Raw pixel values, shape `[batch, 3, H, W]`, range 0-255
    pub images: Tensor<B, 4>,
    /// Label indices, shape `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks `ImageItem`s into an `ImageBatch`. Pixels are left unscaled;
/// the model's input stage rescales them for its backbone.
#[derive(Clone, Copy, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    /// Bytes one batch of `batch_size` images occupies once batched as f32
    pub fn batch_bytes(&self, batch_size: usize) -> usize {
        batch_size * 3 * self.image_size * self.image_size * std::mem::size_of::<f32>()
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let sample_len = 3 * self.image_size * self.image_size;

        let mut pixels = Vec::with_capacity(batch_size * sample_len);
        for item in &items {
            assert_eq!(
                item.pixels.len(),
                sample_len,
                "{:?} was decoded at a different size",
                item.path
            );
            pixels.extend(item.pixels.iter().map(|&v| v as f32));
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, 3, self.image_size, self.image_size]),
            device,
        );

        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn item(value: u8, label: usize, size: usize) -> ImageItem {
        ImageItem {
            pixels: vec![value; 3 * size * size].into(),
            label,
            path: PathBuf::from(format!("{}.png", value)),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = ImageBatcher::new(8);
        let batch: ImageBatch<TestBackend> =
            batcher.batch(vec![item(0, 1, 8), item(255, 0, 8), item(7, 2, 8)], &device);

        assert_eq!(batch.images.dims(), [3, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [3]);

        let targets: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(targets, vec![1, 0, 2]);
    }

    #[test]
    fn test_pixels_stay_unscaled() {
        let device = Default::default();
        let batch: ImageBatch<TestBackend> =
            ImageBatcher::new(4).batch(vec![item(255, 0, 4)], &device);
        let max: f32 = batch.images.max().into_scalar().elem();
        assert_eq!(max, 255.0);
    }

    #[test]
    fn test_batch_bytes() {
        assert_eq!(ImageBatcher::new(224).batch_bytes(32), 32 * 3 * 224 * 224 * 4);
    }
}
