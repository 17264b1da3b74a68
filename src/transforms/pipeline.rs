use burn::tensor::{Int, Tensor, TensorData, backend::Backend};
use image::RgbImage;

use rand::{SeedableRng, rngs::StdRng};

use crate::error::{Result, SsdError};

/// Maximum pixel value for a RGB8 pixel
pub const MAX_PIXEL_VAL: f32 = 255.0;

/// A pipeline for performing chained image transformations on a single sample.
///
/// `Transform` wraps an image tensor along with optional bounding boxes and labels,
/// providing a unified interface for the SSD preprocessing steps:
/// - Resizing to the network input size
/// - Horizontal flipping
/// - Sanitization and normalization of bounding boxes
/// - Saving images with visualized bounding boxes
///
/// # Fields
///
/// * `image` – The 3-channel image tensor in `[C, H, W]` format.
/// * `bboxes` – Optional tensor of bounding boxes in `[N, 4]` format (`[x1, y1, x2, y2]`).
/// * `labels` – Optional tensor of class labels for the bounding boxes.
/// * `device` – Backend device where tensors reside (CPU or GPU).
/// * `rng` – Random number generator for stochastic transformations.
#[derive(Clone, Debug)]
pub struct Transform<B, R = StdRng>
where
    B: Backend,
    R: rand::Rng,
{
    pub image: Tensor<B, 3>,
    pub bboxes: Option<Tensor<B, 2>>,
    pub labels: Option<Tensor<B, 1, Int>>,
    pub device: <B as Backend>::Device,
    pub rng: R,
}

impl<B: Backend, R: rand::Rng> Transform<B, R> {
    /// Creates a new [`Transform`] with an explicitly provided random number generator, for
    /// reproducible augmentation.
    pub fn new_seeded(
        image: Tensor<B, 3>,
        bboxes: Option<Tensor<B, 2>>,
        labels: Option<Tensor<B, 1, Int>>,
        rng: R,
    ) -> Self {
        let device = image.device();
        Self {
            image,
            bboxes,
            rng,
            device,
            labels,
        }
    }

    /// Returns `true` with probability `p`, clamped to `[0, 1]`.
    pub fn should_apply(&mut self, p: f32) -> bool {
        self.rng.random::<f32>() < p.clamp(0.0, 1.0)
    }

    /// Finalizes a chained transformation pipeline and returns the image tensor `[3, H, W]`,
    /// the boxes `[N, 4]` and the labels `[N]`.
    #[allow(clippy::type_complexity)]
    pub fn finish(
        self,
    ) -> (
        Tensor<B, 3>,
        Option<Tensor<B, 2>>,
        Option<Tensor<B, 1, Int>>,
    ) {
        (self.image, self.bboxes, self.labels)
    }

    /// Converts an `image::RgbImage` into a 3-channel tensor in `[C, H, W]` format.
    ///
    /// No scaling is applied; pixel values remain in the `0–255` range.
    pub fn rgb_img_as_tensor(image: RgbImage, device: &B::Device) -> Tensor<B, 3> {
        let (width, height) = image.dimensions();
        let img_vec: Vec<f32> = image.into_raw().iter().map(|&p| p as f32).collect();

        Tensor::<B, 3>::from_data(
            TensorData::new(img_vec, [height as usize, width as usize, 3])
                .convert::<B::FloatElem>(),
            device,
        )
        .permute([2, 0, 1])
    }

    /// Converts the `[C, H, W]` image tensor back into an `image::RgbImage`, rounding and
    /// clamping the values to `0–255`.
    pub fn tensor_as_rgb_img(&self) -> Result<RgbImage> {
        let [_ch, height, width] = self.image.dims();

        let buf: Vec<u8> = self
            .image
            .clone()
            .permute([1, 2, 0])
            .into_data()
            .iter::<f32>()
            .map(|p| p.round().clamp(0.0, MAX_PIXEL_VAL) as u8)
            .collect();

        RgbImage::from_vec(width as u32, height as u32, buf).ok_or(SsdError::ImageBuffer {
            width: width as u32,
            height: height as u32,
        })
    }
}

impl<B: Backend> Transform<B> {
    /// Creates a new instance directly from tensors, with an OS seeded RNG.
    pub fn from_tensors(
        image: Tensor<B, 3>,
        bboxes: Option<Tensor<B, 2>>,
        labels: Option<Tensor<B, 1, Int>>,
    ) -> Self {
        Self::new_seeded(image, bboxes, labels, StdRng::from_os_rng())
    }

    /// Creates a new instance from an `RgbImage` and optional bounding boxes and labels.
    ///
    /// # Example
    /// ```rust,ignore
    /// let (image, bboxes, labels) = Transform::new(rgb_image, Some(bboxes), Some(labels), &device)
    ///     .resize_triangular(300, 300)?
    ///     .random_horizontal_flip(0.5)
    ///     .clean_boxes()?
    ///     .normalize()
    ///     .finish();
    /// ```
    pub fn new(
        image: RgbImage,
        bboxes: Option<Tensor<B, 2>>,
        labels: Option<Tensor<B, 1, Int>>,
        device: &<B as Backend>::Device,
    ) -> Self {
        let image = Self::rgb_img_as_tensor(image, device);
        Self::from_tensors(image, bboxes, labels)
    }
}

/// Creates an RGB test image filled with a single color.
pub fn create_test_image(width: u32, height: u32, pattern: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, image::Rgb(pattern))
}
