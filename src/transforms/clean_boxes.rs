use crate::{
    boxes::boxes_to_components,
    error::{Result, SsdError},
};

use super::pipeline::Transform;
use burn::{
    prelude::Backend,
    tensor::{Int, Tensor, TensorData},
};

impl<B: Backend> Transform<B> {
    /// Drops degenerate bounding boxes together with their labels.
    ///
    /// A box is kept when `x2 > x1`, `y2 > y1`, its corners lie inside the image and its
    /// area is at least one pixel.
    ///
    /// # Errors
    ///
    /// [`SsdError::NoBoxes`] when boxes were given but none survive; the pipeline is then
    /// left unchanged.
    pub fn clean_boxes(&mut self) -> Result<Self> {
        if let Some(bboxes) = self.bboxes.clone() {
            let (x1, y1, x2, y2) = boxes_to_components(bboxes.clone());
            let [_, image_height, image_width] = self.image.dims();

            // (x2 <= x1) || (y2 <= y1) || (x1 < 0) || (y1 < 0) || (x2 > w) || (y2 > h)
            let mask = x2
                .clone()
                .lower_equal(x1.clone())
                .bool_or(y2.clone().lower_equal(y1.clone()))
                .bool_or(x1.clone().lower_elem(0.0))
                .bool_or(y1.clone().lower_elem(0.0))
                .bool_or(x2.clone().greater_elem(image_width as f32))
                .bool_or(y2.clone().greater_elem(image_height as f32));

            let areas = (x2 - x1) * (y2 - y1);
            let invalid = mask.bool_or(areas.lower_elem(1.0));

            let keep: Vec<i64> = invalid
                .into_data()
                .iter::<bool>()
                .enumerate()
                .filter(|(_, invalid)| !invalid)
                .map(|(i, _)| i as i64)
                .collect();

            if keep.is_empty() {
                return Err(SsdError::NoBoxes);
            }

            let keep = Tensor::<B, 1, Int>::from_data(
                TensorData::new(keep.clone(), [keep.len()]).convert::<B::IntElem>(),
                &self.device,
            );

            self.bboxes = Some(bboxes.select(0, keep.clone()));
            self.labels = self.labels.take().map(|labels| labels.select(0, keep));
        }

        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::pipeline::{Transform, create_test_image};
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    type B = NdArray<f32>;

    #[test]
    fn sanitize_bounding_boxes_test() {
        let device = &NdArrayDevice::default();

        let image = create_test_image(12, 12, [127, 128, 255]);

        let bboxes = Tensor::<B, 2>::from_floats(
            [
                [1.0, 1.0, 6.0, 6.0],
                [1.0, 2.0, 3.0, 4.0],
                [2.0, 2.0, 1.0, 4.0],
                [2.0, 2.0, 15.0, 4.0],
                [1.0, 1.0, 1.0, 1.0],
                [5.0, 5.0, 8.0, 8.0],
                [-1.0, 5.0, 8.0, 8.0],
            ],
            device,
        );

        let labels = Tensor::<B, 1, Int>::from_ints([1, 2, 3, 4, 5, 6, 7], device);

        let t = Transform::new(image, Some(bboxes), Some(labels), device);

        let (_, bboxes, labels) = t.clone().clean_boxes().unwrap().finish();

        Tensor::<B, 2>::from_data(
            [
                [1.0, 1.0, 6.0, 6.0],
                [1.0, 2.0, 3.0, 4.0],
                [5.0, 5.0, 8.0, 8.0],
            ],
            device,
        )
        .into_data()
        .assert_eq(&bboxes.unwrap().to_data(), false);

        Tensor::<B, 1, Int>::from_data([1, 2, 6], device)
            .into_data()
            .assert_eq(&labels.unwrap().to_data(), false);
    }

    #[test]
    fn all_invalid_is_an_error() {
        let device = &NdArrayDevice::default();

        let image = create_test_image(12, 12, [0, 0, 0]);
        let bboxes = Tensor::<B, 2>::from_floats([[2.0, 2.0, 1.0, 4.0]], device);
        let labels = Tensor::<B, 1, Int>::from_ints([3], device);

        let mut t = Transform::new(image, Some(bboxes), Some(labels), device);

        assert!(matches!(t.clean_boxes(), Err(SsdError::NoBoxes)));
        assert!(t.bboxes.is_some());
    }

    #[test]
    fn no_boxes_is_fine() {
        let device = &NdArrayDevice::default();

        let mut t = Transform::<B>::new(create_test_image(4, 4, [0, 0, 0]), None, None, device);

        assert!(t.clean_boxes().is_ok());
    }
}
