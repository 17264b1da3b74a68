use std::path::Path;

use super::pipeline::Transform;
use crate::{
    error::{Result, SsdError},
    voc::VocLabels,
};
use burn::prelude::Backend;
use image::Rgb;
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use tracing::debug;

/// Box outline color of a model id, spread over the hue circle.
pub fn label_color(model_id: usize, n_class: usize) -> Rgb<u8> {
    let hue = (model_id % n_class.max(1)) as f32 / n_class.max(1) as f32 * 6.0;
    let x = 1.0 - (hue % 2.0 - 1.0).abs();

    let (r, g, b) = match hue as usize {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };

    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

impl<B: Backend> Transform<B> {
    /// Writes the current image to `path` with the bounding boxes outlined.
    ///
    /// The image tensor is expected in `[C, H, W]` RGB order with `0–255` values, the boxes
    /// in pixel corner form and the labels as model ids (0 being background). The outline
    /// is two pixels wide so it stays visible on large photos.
    pub fn save_as(&mut self, path: &Path, labels: &VocLabels) -> Result<Self> {
        let mut image = self.tensor_as_rgb_img()?;

        if let Some(bboxes) = self.bboxes.clone() {
            let [n_boxes, _] = bboxes.dims();
            let coords: Vec<f32> = bboxes.into_data().iter::<f32>().collect();

            let ids: Vec<usize> = match self.labels.clone() {
                Some(l) => l.into_data().iter::<i64>().map(|id| id as usize).collect(),
                None => vec![0; n_boxes],
            };

            for (bbox, model_id) in coords.chunks_exact(4).zip(ids) {
                let (x1, y1, x2, y2) = (bbox[0], bbox[1], bbox[2], bbox[3]);
                let color = label_color(model_id, labels.count());

                debug!(
                    label = labels.model_id_to_name(model_id),
                    x1, y1, x2, y2, "drawing box"
                );

                for inset in 0..2 {
                    let inset = inset as f32;
                    let width = (x2 - x1 - 2.0 * inset).max(1.0) as u32;
                    let height = (y2 - y1 - 2.0 * inset).max(1.0) as u32;

                    let rect = Rect::at((x1 + inset) as i32, (y1 + inset) as i32)
                        .of_size(width, height);

                    draw_hollow_rect_mut(&mut image, rect, color);
                }
            }
        }

        image.save(path).map_err(|e| SsdError::image(path, e))?;

        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::pipeline::create_test_image;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Int, Tensor};

    type B = NdArray<f32>;

    #[test]
    fn save_as_draws_boxes() {
        let device = &NdArrayDevice::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boxes.png");

        let bboxes = Tensor::<B, 2>::from_floats([[2.0, 3.0, 12.0, 10.0]], device);
        let labels_t = Tensor::<B, 1, Int>::from_ints([1], device);
        let labels = VocLabels::voc();

        Transform::new(
            create_test_image(16, 16, [0, 0, 0]),
            Some(bboxes),
            Some(labels_t),
            device,
        )
        .save_as(&path, &labels)
        .unwrap();

        let saved = image::open(&path).unwrap().to_rgb8();
        let color = label_color(1, labels.count());

        assert_eq!(saved.dimensions(), (16, 16));
        assert_eq!(saved.get_pixel(2, 3), &color);
        assert_eq!(saved.get_pixel(3, 4), &color);
        assert_eq!(saved.get_pixel(7, 7), &Rgb([0, 0, 0]));
        assert_eq!(saved.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn label_colors_differ() {
        assert_ne!(label_color(1, 21), label_color(2, 21));
        assert_eq!(label_color(0, 21), Rgb([255, 0, 0]));
    }
}
