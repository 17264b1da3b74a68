use crate::{boxes::boxes_to_components, error::Result};

use super::pipeline::Transform;
use burn::{prelude::Backend, tensor::Tensor};
use image::{DynamicImage, imageops::FilterType};

fn resize_bboxes<B: Backend>(
    t: &mut Transform<B>,
    new_w: usize,
    new_h: usize,
    image_h: usize,
    image_w: usize,
) {
    if let Some(bboxes) = t.bboxes.as_mut() {
        let (x1, y1, x2, y2) = boxes_to_components(bboxes.clone());
        let h_ratio = new_h as f32 / image_h as f32;
        let w_ratio = new_w as f32 / image_w as f32;

        t.bboxes = Some(Tensor::cat(
            vec![x1 * w_ratio, y1 * h_ratio, x2 * w_ratio, y2 * h_ratio],
            1,
        ));
    }
}

impl<B: Backend> Transform<B> {
    /// Resizes the image to `new_w` x `new_h` with triangular (bilinear) filtering, ignoring
    /// the aspect ratio, and scales the bounding boxes by the same factors.
    ///
    /// The resampling runs on the CPU through the `image` crate. Labels remain unchanged.
    pub fn resize_triangular(&mut self, new_w: usize, new_h: usize) -> Result<Self> {
        let [_ch, height, width] = self.image.dims();

        if new_w == width && new_h == height {
            return Ok(self.clone());
        }

        let image = DynamicImage::from(self.tensor_as_rgb_img()?)
            .resize_exact(new_w as u32, new_h as u32, FilterType::Triangle)
            .to_rgb8();

        self.image = Self::rgb_img_as_tensor(image, &self.device);

        resize_bboxes(self, new_w, new_h, height, width);

        Ok(self.clone())
    }
}
