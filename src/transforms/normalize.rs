use crate::boxes::boxes_to_components;

use super::pipeline::Transform;
use burn::{
    prelude::Backend,
    tensor::{Device, Tensor},
};

/// Per-channel pixel mean of the VGG16 ImageNet training set, in BGR order.
pub const MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

#[derive(Clone)]
pub struct ImageNormalizer<B: Backend> {
    pub mean: Tensor<B, 3>,
}

impl<B: Backend> ImageNormalizer<B> {
    pub fn new(device: &Device<B>) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN_BGR, device).reshape([3, 1, 1]);
        Self { mean }
    }

    /// Reorders an RGB `[3, H, W]` image in `0–255` to BGR and subtracts the channel mean.
    pub fn normalize(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        input.flip([0]) - self.mean.clone()
    }
}

impl<B: Backend> Transform<B> {
    /// Prepares a sample for the network.
    ///
    /// 1. **Bounding boxes** – converted from pixels to coordinates relative to the image
    ///    size (`[0.0, 1.0]`), matching the normalized default boxes.
    /// 2. **Image tensor** – converted to BGR channel order with the VGG mean subtracted.
    pub fn normalize(&mut self) -> Self {
        let [_ch, height, width] = self.image.dims();

        if let Some(bboxes) = self.bboxes.as_mut() {
            let (x1, y1, x2, y2) = boxes_to_components(bboxes.clone());
            let x1 = x1 / width as f32;
            let y1 = y1 / height as f32;
            let x2 = x2 / width as f32;
            let y2 = y2 / height as f32;

            self.bboxes = Some(Tensor::cat(vec![x1, y1, x2, y2], 1));
        }

        self.image = ImageNormalizer::new(&self.device).normalize(self.image.clone());

        self.clone()
    }
}
