use burn::{
    prelude::Backend,
    tensor::{Int, Tensor, TensorData, activation::softmax},
};
use tracing::debug;

use crate::boxes::{
    box_generation, box_regression, cxcywh_to_x1y1x2y2, default_boxes_tensor,
    generate_default_boxes, get_box_count_for_layer, get_iou,
};
use crate::config::MultiBoxConfig;
use crate::error::Result;
use crate::nms::{Detection, class_nms};

/// Maximum number of detections returned per image.
pub const TOP_K: usize = 200;

/// Translates between ground truth boxes and the per-anchor targets the SSD heads are
/// trained on.
///
/// Matching strategy - Pg. 5 Liu et al.
///
/// We begin by matching each ground truth box to the default box with the best jaccard
/// overlap. Unlike MultiBox, we then match default boxes to any ground truth with jaccard
/// overlap higher than a threshold (0.5).
#[derive(Debug, Clone)]
pub struct MultiBoxEncoder {
    config: MultiBoxConfig,
    default_boxes: Vec<[f32; 4]>,
    n_anchors: Vec<usize>,
}

impl MultiBoxEncoder {
    pub fn new(config: MultiBoxConfig) -> Result<Self> {
        let default_boxes = generate_default_boxes(&config)?;
        let n_anchors = config
            .aspect_ratios
            .iter()
            .map(|ar| get_box_count_for_layer(ar))
            .collect();

        debug!(anchors = default_boxes.len(), "default boxes generated");

        Ok(Self {
            config,
            default_boxes,
            n_anchors,
        })
    }

    /// Anchors per feature map cell, one entry per scale.
    pub fn n_anchors(&self) -> &[usize] {
        &self.n_anchors
    }

    /// Total number of anchors over all scales.
    pub fn len(&self) -> usize {
        self.default_boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.default_boxes.is_empty()
    }

    /// Anchors in `(cx, cy, w, h)` form.
    pub fn default_boxes(&self) -> &[[f32; 4]] {
        &self.default_boxes
    }

    pub fn config(&self) -> &MultiBoxConfig {
        &self.config
    }

    /// Assigns ground truth to anchors.
    ///
    /// `boxes` is `[G, 4]` in normalized `(cx, cy, w, h)` form and `labels` holds the `G`
    /// 0-based class indices. Returns the regression targets `[A, 4]` and the anchor
    /// classes `[A]`, where 0 is background and `label + 1` a matched object.
    ///
    /// Boxes without a positive finite width and height have no log-space target and are
    /// left out.
    pub fn encode<B: Backend>(
        &self,
        boxes: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
    ) -> (Tensor<B, 2>, Tensor<B, 1, Int>) {
        let device = boxes.device();
        let n_default = self.len();
        let [n_boxes, _] = boxes.dims();

        let keep: Vec<i64> = boxes
            .clone()
            .into_data()
            .iter::<f32>()
            .collect::<Vec<_>>()
            .chunks_exact(4)
            .enumerate()
            .filter(|(_, b)| b.iter().all(|v| v.is_finite()) && b[2] > 0.0 && b[3] > 0.0)
            .map(|(i, _)| i as i64)
            .collect();

        if keep.is_empty() {
            return (
                Tensor::zeros([n_default, 4], &device),
                Tensor::zeros([n_default], &device),
            );
        }

        let (boxes, labels) = if keep.len() == n_boxes {
            (boxes, labels)
        } else {
            debug!(dropped = n_boxes - keep.len(), "ground truth boxes without area");

            let keep = Tensor::<B, 1, Int>::from_data(
                TensorData::new(keep.clone(), [keep.len()]).convert::<B::IntElem>(),
                &device,
            );
            (boxes.select(0, keep.clone()), labels.select(0, keep))
        };

        let dflt_bxs = default_boxes_tensor::<B>(&self.default_boxes, &device);

        // [G, A]
        let iou = get_iou(
            cxcywh_to_x1y1x2y2(boxes.clone()),
            cxcywh_to_x1y1x2y2(dflt_bxs.clone()),
        );

        // best ground truth of every anchor
        let (best_iou, best_gt) = iou.clone().max_dim_with_indices(0);
        let best_iou: Vec<f32> = best_iou.into_data().iter::<f32>().collect();
        let mut assigned: Vec<i64> = best_gt.into_data().iter::<i64>().collect();

        // every ground truth keeps its best anchor, whatever the overlap
        let best_anchor: Vec<i64> = iou.argmax(1).into_data().iter::<i64>().collect();
        let mut forced = vec![false; n_default];

        for (gt, anchor) in best_anchor.iter().enumerate() {
            let anchor = *anchor as usize;
            assigned[anchor] = gt as i64;
            forced[anchor] = true;
        }

        let labels: Vec<i64> = labels.into_data().iter::<i64>().collect();

        let conf: Vec<i64> = (0..n_default)
            .map(|a| {
                if forced[a] || best_iou[a] >= self.config.threshold {
                    labels[assigned[a] as usize] + 1
                } else {
                    0
                }
            })
            .collect();

        let assigned = Tensor::<B, 1, Int>::from_data(
            TensorData::new(assigned, [n_default]).convert::<B::IntElem>(),
            &device,
        );
        let conf = Tensor::<B, 1, Int>::from_data(
            TensorData::new(conf, [n_default]).convert::<B::IntElem>(),
            &device,
        );

        let loc = box_regression(
            boxes.select(0, assigned),
            dflt_bxs,
            self.config.variance(),
        );

        (loc, conf)
    }

    /// Convenience wrapper of [`Self::encode`] for plain box lists.
    pub fn encode_boxes<B: Backend>(
        &self,
        boxes: &[[f32; 4]],
        labels: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 2>, Tensor<B, 1, Int>) {
        let boxes_t = default_boxes_tensor::<B>(boxes, device);
        let labels_t = Tensor::<B, 1, Int>::from_data(
            TensorData::new(
                labels.iter().map(|l| *l as i64).collect::<Vec<_>>(),
                [labels.len()],
            )
            .convert::<B::IntElem>(),
            device,
        );

        self.encode(boxes_t, labels_t)
    }

    /// Inverse of [`Self::encode`] for network outputs.
    ///
    /// `loc` is `[A, 4]` and `conf` the `[A, C]` class logits. Returns the boxes `[A, 4]`
    /// in `(cx, cy, w, h)` form and the softmax class scores `[A, C]`.
    pub fn decode<B: Backend>(
        &self,
        loc: Tensor<B, 2>,
        conf: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let dflt_bxs = default_boxes_tensor::<B>(&self.default_boxes, &loc.device());

        let boxes = box_generation(loc, dflt_bxs, self.config.variance());
        let scores = softmax(conf, 1);

        (boxes, scores)
    }

    /// Decodes one image's predictions into detections.
    ///
    /// Background is dropped, scores at or below `score_threshold` are discarded, the rest
    /// go through per-class NMS and the best [`TOP_K`] are kept. Boxes are in normalized
    /// corner form, clipped to the image.
    pub fn detect<B: Backend>(
        &self,
        loc: Tensor<B, 2>,
        conf: Tensor<B, 2>,
        nms_threshold: f32,
        score_threshold: f32,
    ) -> Vec<Detection> {
        let [n_default, n_class] = conf.dims();

        let (boxes, scores) = self.decode(loc, conf);

        let boxes: Vec<f32> = cxcywh_to_x1y1x2y2(boxes)
            .clamp(0.0, 1.0)
            .into_data()
            .iter::<f32>()
            .collect();
        let scores: Vec<f32> = scores.into_data().iter::<f32>().collect();

        let mut candidates = vec![];

        for a in 0..n_default {
            // class 0 is background
            for c in 1..n_class {
                let score = scores[a * n_class + c];

                if score > score_threshold {
                    let b = &boxes[a * 4..a * 4 + 4];

                    candidates.push(Detection {
                        label: c - 1,
                        score,
                        bbox: [b[0], b[1], b[2], b[3]],
                    });
                }
            }
        }

        debug!(candidates = candidates.len(), "detections above score threshold");

        class_nms(candidates, nms_threshold, TOP_K)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::assert_vec_approx_eq;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    type B = NdArray<f32>;

    fn encoder() -> MultiBoxEncoder {
        MultiBoxEncoder::new(MultiBoxConfig::ssd300()).unwrap()
    }

    fn positives(conf: &Tensor<B, 1, Int>) -> Vec<(usize, i64)> {
        conf.clone()
            .into_data()
            .iter::<i64>()
            .enumerate()
            .filter(|(_, c)| *c > 0)
            .collect()
    }

    #[test]
    fn test_anchor_counts() {
        let encoder = encoder();

        assert_eq!(encoder.n_anchors(), &[4, 6, 6, 6, 4, 4]);
        assert_eq!(encoder.len(), 8732);
    }

    #[test]
    fn test_encode_without_boxes() {
        let device = &NdArrayDevice::default();

        let (loc, conf) = encoder().encode_boxes::<B>(&[], &[], device);

        assert_eq!(loc.dims(), [8732, 4]);
        assert_eq!(conf.dims(), [8732]);
        assert!(loc.into_data().iter::<f32>().all(|v| v == 0.0));
        assert!(positives(&conf).is_empty());
    }

    #[test]
    fn test_encode_exact_anchor() {
        let device = &NdArrayDevice::default();
        let encoder = encoder();

        // the first anchor of the 1x1 map
        let gt = encoder.default_boxes()[8728];
        let (loc, conf) = encoder.encode_boxes::<B>(&[gt], &[6], device);

        let conf_v: Vec<i64> = conf.clone().into_data().iter::<i64>().collect();
        assert_eq!(conf_v[8728], 7);

        // every positive carries the label and the matching anchor needs no offset
        assert!(positives(&conf).iter().all(|(_, c)| *c == 7));

        let row = loc.narrow(0, 8728, 1).into_data().to_vec::<f32>().unwrap();
        assert_vec_approx_eq(&row, &[0.0, 0.0, 0.0, 0.0], 1e-5);
    }

    #[test]
    fn test_encode_skips_boxes_without_area() {
        let device = &NdArrayDevice::default();
        let encoder = encoder();

        let (loc, conf) = encoder.encode_boxes::<B>(&[[0.5, 0.5, 0.0, 0.2]], &[3], device);

        assert!(positives(&conf).is_empty());
        assert!(loc.into_data().iter::<f32>().all(|v| v == 0.0));

        let gt = encoder.default_boxes()[8728];
        let (loc, conf) = encoder.encode_boxes::<B>(
            &[[0.3, 0.3, 0.2, 0.0], gt],
            &[3, 6],
            device,
        );

        assert!(positives(&conf).iter().all(|(_, c)| *c == 7));
        assert!(loc.into_data().iter::<f32>().all(|v| v.is_finite()));
    }

    #[test]
    fn test_encode_forces_best_anchor() {
        let device = &NdArrayDevice::default();

        // too small to reach the threshold with any anchor
        let (_loc, conf) = encoder().encode_boxes::<B>(&[[0.5, 0.5, 0.01, 0.01]], &[0], device);

        let matched = positives(&conf);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].1, 1);
    }

    #[test]
    fn test_encode_two_objects() {
        let device = &NdArrayDevice::default();
        let encoder = encoder();

        let left = [0.25, 0.5, 0.3, 0.6];
        let right = [0.75, 0.5, 0.3, 0.6];
        let (_loc, conf) = encoder.encode_boxes::<B>(&[left, right], &[2, 14], device);

        let matched = positives(&conf);
        let boxes = encoder.default_boxes();

        assert!(matched.iter().any(|(_, c)| *c == 3));
        assert!(matched.iter().any(|(_, c)| *c == 15));

        for (anchor, c) in matched {
            let cx = boxes[anchor][0];
            if c == 3 {
                assert!(cx < 0.5);
            } else {
                assert!(cx > 0.5);
            }
        }
    }

    #[test]
    fn test_decode_inverts_encode() {
        let device = &NdArrayDevice::default();
        let encoder = encoder();

        let gt = [0.4, 0.55, 0.3, 0.5];
        let (loc, _conf) = encoder.encode_boxes::<B>(&[gt], &[0], device);

        let (boxes, scores) = encoder.decode(loc, Tensor::<B, 2>::zeros([8732, 21], device));

        // a single object is the assigned ground truth of every anchor
        let expected: Vec<f32> = gt.iter().copied().cycle().take(8732 * 4).collect();
        assert_vec_approx_eq(
            &boxes.into_data().to_vec::<f32>().unwrap(),
            &expected,
            1e-4,
        );

        let first = scores.narrow(0, 0, 1).into_data().to_vec::<f32>().unwrap();
        assert_vec_approx_eq(&first, &[1.0 / 21.0; 21], 1e-6);
    }

    #[test]
    fn test_detect_single_object() {
        let device = &NdArrayDevice::default();
        let encoder = encoder();

        let loc = Tensor::<B, 2>::zeros([8732, 4], device);
        let mut logits = vec![0.0f32; 8732 * 21];
        logits[8728 * 21 + 2] = 10.0;
        let conf = Tensor::<B, 2>::from_data(TensorData::new(logits, [8732, 21]), device);

        let detections = encoder.detect(loc, conf, 0.45, 0.6);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, 1);
        assert!(detections[0].score > 0.99);
        assert_vec_approx_eq(&detections[0].bbox, &[0.06, 0.06, 0.94, 0.94], 1e-5);
    }

    #[test]
    fn test_detect_clips_to_image() {
        let device = &NdArrayDevice::default();
        let encoder = encoder();

        let loc = Tensor::<B, 2>::zeros([8732, 4], device);
        let mut logits = vec![0.0f32; 8732 * 21];
        // wide anchor of the 1x1 map overflows horizontally
        logits[8730 * 21 + 5] = 10.0;
        let conf = Tensor::<B, 2>::from_data(TensorData::new(logits, [8732, 21]), device);

        let detections = encoder.detect(loc, conf, 0.45, 0.6);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox[0], 0.0);
        assert_eq!(detections[0].bbox[2], 1.0);
    }
}
