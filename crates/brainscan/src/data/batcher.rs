//! # Classification Batching

use crate::data::dataset::ImageDirectoryDataset;
use crate::data::preprocess::PreprocessConfig;
use anyhow::{anyhow, bail};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::vision::{Annotation, ImageDatasetItem, PixelDepth};
use burn::prelude::{Backend, Tensor};
use burn::tensor::{ElementConversion, Int, TensorData};
use image::{DynamicImage, ImageBuffer};
use std::sync::Arc;

/// A batch of preprocessed images and their class indices.
#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// ``[batch, 3, height, width]`` images.
    pub images: Tensor<B, 4>,

    /// ``[batch]`` class indices.
    pub targets: Tensor<B, 1, Int>,
}

/// Preprocesses decoded [`ImageDatasetItem`]s into [`ClassificationBatch`]es.
#[derive(Clone, Debug)]
pub struct ClassificationBatcher {
    preprocess: PreprocessConfig,
}

impl ClassificationBatcher {
    /// Create a batcher applying `preprocess` to every item.
    pub fn new(preprocess: PreprocessConfig) -> Self {
        Self { preprocess }
    }
}

impl<B: Backend> Batcher<B, ImageDatasetItem, ClassificationBatch<B>> for ClassificationBatcher {
    fn batch(
        &self,
        items: Vec<ImageDatasetItem>,
        device: &B::Device,
    ) -> ClassificationBatch<B> {
        let [channels, height, width] = self.preprocess.item_shape();

        let mut pixels = Vec::with_capacity(items.len() * self.preprocess.item_len());
        let mut targets = Vec::with_capacity(items.len());

        for item in items {
            let Annotation::Label(label) = item.annotation else {
                tracing::warn!(path = %item.image_path, "item has no class label; skipping");
                continue;
            };
            match item_to_image(&item) {
                Ok(image) => pixels.extend(self.preprocess.preprocess_image(&image)),
                Err(err) => {
                    tracing::warn!(
                        path = %item.image_path,
                        error = %err,
                        "malformed image buffer; substituting a zero image"
                    );
                    pixels.extend(std::iter::repeat_n(0.0f32, self.preprocess.item_len()));
                }
            }
            targets.push((label as i64).elem::<B::IntElem>());
        }

        let batch_size = targets.len();
        let images = TensorData::new(pixels, [batch_size, channels, height, width])
            .convert::<B::FloatElem>();
        let targets = TensorData::new(targets, [batch_size]);

        ClassificationBatch {
            images: Tensor::from_data(images, device),
            targets: Tensor::from_data(targets, device),
        }
    }
}

/// Rebuild a [`DynamicImage`] from a dataset item's interleaved pixels.
///
/// The channel count is inferred from the buffer length: 1 (luma),
/// 2 (luma + alpha), 3 (rgb) or 4 (rgba).
pub fn item_to_image(item: &ImageDatasetItem) -> anyhow::Result<DynamicImage> {
    let (width, height) = (item.image_width, item.image_height);
    let plane = width * height;
    if plane == 0 || item.image.len() % plane != 0 {
        bail!(
            "{} pixel values do not fit a {width}x{height} image",
            item.image.len()
        );
    }
    let channels = item.image.len() / plane;
    let (w, h) = (width as u32, height as u32);

    fn raw<T: TryFrom<PixelDepth, Error = &'static str>>(
        pixels: &[PixelDepth],
    ) -> anyhow::Result<Vec<T>> {
        pixels
            .iter()
            .map(|p| T::try_from(p.clone()).map_err(anyhow::Error::msg))
            .collect()
    }

    let image = match item.image.first() {
        Some(PixelDepth::U8(_)) => {
            let data = raw::<u8>(&item.image)?;
            match channels {
                1 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
                2 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLumaA8),
                3 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
                4 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
                _ => None,
            }
        }
        Some(PixelDepth::U16(_)) => {
            let data = raw::<u16>(&item.image)?;
            match channels {
                1 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLuma16),
                2 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLumaA16),
                3 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgb16),
                4 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgba16),
                _ => None,
            }
        }
        Some(PixelDepth::F32(_)) => {
            let data = raw::<f32>(&item.image)?;
            match channels {
                3 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgb32F),
                4 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgba32F),
                _ => None,
            }
        }
        None => None,
    };

    image.ok_or_else(|| anyhow!("unsupported {channels}-channel pixel layout"))
}

/// Build a data loader over an image directory.
///
/// Pass a `shuffle_seed` for training loaders; validation loaders keep
/// dataset order.
pub fn build_loader<B: Backend>(
    dataset: ImageDirectoryDataset,
    batcher: ClassificationBatcher,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    num_workers: usize,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, ClassificationBatch<B>>> {
    let mut builder = DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .set_device(device.clone());

    if let Some(seed) = shuffle_seed {
        builder = builder.shuffle(seed);
    }
    if num_workers > 0 {
        builder = builder.num_workers(num_workers);
    }

    builder.build(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::write_two_class_tree;
    use crate::data::preprocess::PixelNormalization;
    use burn::backend::NdArray;
    use burn::data::dataset::Dataset;

    type B = NdArray<f32>;

    fn small_preprocess() -> PreprocessConfig {
        PreprocessConfig::new()
            .with_image_size([8, 8])
            .with_normalization(PixelNormalization::Inception)
    }

    #[test]
    fn test_batch() {
        let root = tempfile::tempdir().unwrap();
        write_two_class_tree(root.path(), 1);
        let dataset = ImageDirectoryDataset::discover(root.path()).unwrap();

        let batcher = ClassificationBatcher::new(small_preprocess());
        let device = Default::default();
        let items: Vec<ImageDatasetItem> =
            (0..dataset.len()).filter_map(|idx| dataset.get(idx)).collect();
        let batch: ClassificationBatch<B> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(
            batch.targets.into_data().to_vec::<i64>().unwrap(),
            vec![0, 1]
        );

        // dark -> -1.0, light -> 1.0 under inception scaling.
        let means = batch
            .images
            .mean_dim(3)
            .mean_dim(2)
            .mean_dim(1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(means, vec![-1.0, 1.0]);
    }

    #[test]
    fn test_batch_substitutes_malformed_images() {
        let batcher = ClassificationBatcher::new(small_preprocess());
        let device = Default::default();

        let items = vec![ImageDatasetItem {
            image: vec![PixelDepth::U8(7); 5],
            image_width: 2,
            image_height: 2,
            annotation: Annotation::Label(3),
            image_path: "/definitely/not/here.png".to_string(),
        }];
        let batch: ClassificationBatch<B> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [1, 3, 8, 8]);
        assert_eq!(batch.images.abs().sum().into_scalar(), 0.0);
        assert_eq!(batch.targets.into_data().to_vec::<i64>().unwrap(), vec![3]);
    }

    #[test]
    fn test_build_loader_keeps_order_without_shuffle() {
        let root = tempfile::tempdir().unwrap();
        write_two_class_tree(root.path(), 3);
        let dataset = ImageDirectoryDataset::discover(root.path()).unwrap();

        let device = Default::default();
        let loader = build_loader::<B>(
            dataset,
            ClassificationBatcher::new(small_preprocess()),
            4,
            None,
            0,
            &device,
        );
        assert_eq!(loader.num_items(), 6);

        let labels: Vec<i64> = loader
            .iter()
            .flat_map(|batch| batch.targets.into_data().to_vec::<i64>().unwrap())
            .collect();
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_build_loader_shuffled_covers_all_items() {
        let root = tempfile::tempdir().unwrap();
        write_two_class_tree(root.path(), 3);
        let dataset = ImageDirectoryDataset::discover(root.path()).unwrap();

        let device = Default::default();
        let loader = build_loader::<B>(
            dataset,
            ClassificationBatcher::new(small_preprocess()),
            2,
            Some(7),
            2,
            &device,
        );

        let mut labels: Vec<i64> = loader
            .iter()
            .flat_map(|batch| batch.targets.into_data().to_vec::<i64>().unwrap())
            .collect();
        labels.sort();
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_item_to_image_channel_layouts() {
        let item = |image: Vec<PixelDepth>| ImageDatasetItem {
            image,
            image_width: 2,
            image_height: 1,
            annotation: Annotation::Label(0),
            image_path: "mem.png".to_string(),
        };

        let gray = item_to_image(&item(vec![PixelDepth::U8(10), PixelDepth::U8(20)])).unwrap();
        assert!(matches!(gray, DynamicImage::ImageLuma8(_)));
        assert_eq!(gray.to_rgb8().get_pixel(1, 0).0, [20, 20, 20]);

        let rgb = item_to_image(&item(vec![PixelDepth::U16(1); 6])).unwrap();
        assert!(matches!(rgb, DynamicImage::ImageRgb16(_)));

        let rgba = item_to_image(&item(vec![PixelDepth::F32(0.5); 8])).unwrap();
        assert!(matches!(rgba, DynamicImage::ImageRgba32F(_)));

        assert!(item_to_image(&item(vec![PixelDepth::F32(0.5); 2])).is_err());
        assert!(item_to_image(&item(vec![PixelDepth::U8(0), PixelDepth::U16(0)])).is_err());
        assert!(item_to_image(&item(vec![])).is_err());
    }
}
