use crate::{boxes::boxes_to_components, transforms::pipeline::Transform};
use burn::{prelude::Backend, tensor::Tensor};

impl<B: Backend> Transform<B> {
    /// Horizontally flips the image and its bounding boxes.
    ///
    /// The flip mirrors the width dimension (`W`); box `x` coordinates become
    /// `width - x` with the corners swapped, `y` coordinates are unchanged.
    pub fn horizontal_flip(&mut self) -> Self {
        let [_ch, _height, width] = self.image.dims();

        self.image = self.image.clone().flip([2]);

        if let Some(bboxes) = self.bboxes.as_mut() {
            let (x1, y1, x2, y2) = boxes_to_components(bboxes.clone());

            let flipped_x1 = x2.neg().add_scalar(width as f32);
            let flipped_x2 = x1.neg().add_scalar(width as f32);

            self.bboxes = Some(Tensor::cat(vec![flipped_x1, y1, flipped_x2, y2], 1));
        }

        self.clone()
    }

    /// Applies [`Self::horizontal_flip`] with probability `p`.
    pub fn random_horizontal_flip(&mut self, p: f32) -> Self {
        if !self.should_apply(p) {
            return self.clone();
        }
        self.horizontal_flip()
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::Tensor;

    use crate::transforms::pipeline::{Transform, create_test_image};

    type B = NdArray<f32>;

    #[test]
    fn horizontal_flip_test() {
        let device = &NdArrayDevice::default();

        let mut image = create_test_image(12, 12, [127, 128, 255]);
        image.put_pixel(0, 3, image::Rgb([1, 2, 3]));

        let bboxes = Tensor::<B, 2>::from_floats(
            [[1.0, 1.0, 6.0, 6.0], [1.0, 2.0, 3.0, 4.0]],
            device,
        );

        let t = Transform::new(image, Some(bboxes), None, device);
        let (image, bboxes, _) = t.clone().horizontal_flip().finish();

        // the marked pixel moves to the last column
        let flipped = Transform::<B>::from_tensors(image, None, None)
            .tensor_as_rgb_img()
            .unwrap();
        assert_eq!(flipped.get_pixel(11, 3), &image::Rgb([1, 2, 3]));
        assert_eq!(flipped.get_pixel(0, 3), &image::Rgb([127, 128, 255]));

        Tensor::<B, 2>::from_data([[6.0, 1.0, 11.0, 6.0], [9.0, 2.0, 11.0, 4.0]], device)
            .to_data()
            .assert_eq(&bboxes.unwrap().to_data(), true);
    }

    #[test]
    fn random_horizontal_flip_never_applies_at_zero() {
        let device = &NdArrayDevice::default();

        let bboxes = Tensor::<B, 2>::from_floats([[1.0, 1.0, 6.0, 6.0]], device);
        let t = Transform::new(create_test_image(12, 12, [0, 0, 0]), Some(bboxes), None, device);

        let (_, bboxes, _) = t.clone().random_horizontal_flip(0.0).finish();

        Tensor::<B, 2>::from_data([[1.0, 1.0, 6.0, 6.0]], device)
            .to_data()
            .assert_eq(&bboxes.unwrap().to_data(), true);
    }
}
