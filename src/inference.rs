use std::path::Path;

use burn::{
    prelude::*,
    tensor::{Int, TensorData},
};
use image::RgbImage;
use tracing::info;

use crate::{
    config::{MultiBoxConfig, SIZE},
    error::{Result, SsdError},
    models::ssd::SSD,
    multibox::MultiBoxEncoder,
    nms::Detection,
    transforms::pipeline::Transform,
    voc::VocLabels,
};

/// Thresholds applied when turning network outputs into detections.
#[derive(Debug, Clone, Copy)]
pub struct DetectThresholds {
    pub nms: f32,
    pub score: f32,
}

/// A trained network together with the anchors it was trained against.
pub struct Detector<B: Backend> {
    model: SSD<B>,
    encoder: MultiBoxEncoder,
    device: B::Device,
}

impl<B: Backend> Detector<B> {
    pub fn new(model: SSD<B>, encoder: MultiBoxEncoder, device: &B::Device) -> Self {
        Self {
            model,
            encoder,
            device: device.clone(),
        }
    }

    /// Loads a `model_iter_<n>` snapshot trained with `labels` and the given anchor layout.
    pub fn from_file(
        path: &Path,
        labels: &VocLabels,
        multibox: MultiBoxConfig,
        device: &B::Device,
    ) -> Result<Self> {
        let encoder = MultiBoxEncoder::new(multibox)?;
        let model = SSD::from_file(path, device, labels.count(), encoder.n_anchors())?;

        Ok(Self::new(model, encoder, device))
    }

    /// Runs the network on one image. Boxes of the returned detections are relative to the
    /// image size.
    pub fn detect(&self, image: RgbImage, thresholds: DetectThresholds) -> Result<Vec<Detection>> {
        let (input, _, _) = Transform::new(image, None, None, &self.device)
            .resize_triangular(SIZE, SIZE)?
            .normalize()
            .finish();

        let (loc, conf) = self.model.forward(input.unsqueeze());

        Ok(self.encoder.detect(
            loc.squeeze(0),
            conf.squeeze(0),
            thresholds.nms,
            thresholds.score,
        ))
    }
}

/// Detects objects in the image at `image_path`, logs them and writes a copy of the image
/// with the boxes outlined to `out`.
pub fn infer<B: Backend>(
    detector: &Detector<B>,
    image_path: &Path,
    out: &Path,
    labels: &VocLabels,
    thresholds: DetectThresholds,
) -> Result<Vec<Detection>> {
    let image = image::open(image_path)
        .map_err(|e| SsdError::image(image_path, e))?
        .to_rgb8();
    let (width, height) = image.dimensions();

    let detections = detector.detect(image.clone(), thresholds)?;

    info!(
        image = %image_path.display(),
        detections = detections.len(),
        "inference done"
    );

    for d in detections.iter() {
        let [x1, y1, x2, y2] = d.to_pixels(width, height);
        info!(
            class = labels.name(d.label).unwrap_or("unknown"),
            score = format!("{:.3}", d.score),
            x1, y1, x2, y2,
            "detection"
        );
    }

    let (bboxes, ids) = if detections.is_empty() {
        (None, None)
    } else {
        let flat: Vec<f32> = detections
            .iter()
            .flat_map(|d| d.to_pixels(width, height))
            .collect();
        let ids: Vec<i64> = detections.iter().map(|d| d.label as i64 + 1).collect();

        (
            Some(Tensor::<B, 2>::from_data(
                TensorData::new(flat, [detections.len(), 4]).convert::<B::FloatElem>(),
                &detector.device,
            )),
            Some(Tensor::<B, 1, Int>::from_data(
                TensorData::new(ids, [detections.len()]).convert::<B::IntElem>(),
                &detector.device,
            )),
        )
    };

    Transform::new(image, bboxes, ids, &detector.device).save_as(out, labels)?;

    info!(out = %out.display(), "annotated image written");

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::pipeline::create_test_image;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    type B = NdArray<f32>;

    #[test]
    #[ignore = "runs the full SSD300 network"]
    fn infer_writes_annotated_image() {
        let device = &NdArrayDevice::default();
        let dir = tempfile::tempdir().unwrap();
        let labels = VocLabels::new(&["dog", "cat"]).unwrap();

        let encoder = MultiBoxEncoder::new(MultiBoxConfig::ssd300()).unwrap();
        let model = SSD::<B>::new(device, labels.count(), encoder.n_anchors());
        let detector = Detector::new(model, encoder, device);

        let image_path = dir.path().join("input.png");
        create_test_image(64, 48, [90, 140, 30])
            .save(&image_path)
            .unwrap();
        let out = dir.path().join("output.png");

        let detections = infer(
            &detector,
            &image_path,
            &out,
            &labels,
            DetectThresholds {
                nms: 0.45,
                score: 0.6,
            },
        )
        .unwrap();

        assert!(detections.len() <= crate::multibox::TOP_K);
        assert!(detections.iter().all(|d| d.label < labels.len()));
        assert_eq!(image::open(&out).unwrap().to_rgb8().dimensions(), (64, 48));
    }

    #[test]
    fn missing_image_is_an_error() {
        let device = &NdArrayDevice::default();
        let dir = tempfile::tempdir().unwrap();
        let labels = VocLabels::voc();

        let encoder = MultiBoxEncoder::new(MultiBoxConfig::ssd300()).unwrap();
        let model = SSD::<B>::new(device, labels.count(), encoder.n_anchors());
        let detector = Detector::new(model, encoder, device);

        let result = infer(
            &detector,
            &dir.path().join("missing.jpg"),
            &dir.path().join("out.jpg"),
            &labels,
            DetectThresholds {
                nms: 0.45,
                score: 0.6,
            },
        );

        assert!(matches!(result, Err(SsdError::Image { .. })));
    }
}
