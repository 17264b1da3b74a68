use burn::{
    module::{Module, Param},
    nn::{
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    tensor::{Tensor, backend::Backend},
};

use crate::layers::SSDConvLayers;

/// Convolutional predictors for one source feature map.
///
/// Pg. 3 Liu et al., Convolutional predictors for detection
///
/// For a feature layer of size m × n with p channels, the basic element for predicting
/// parameters of a potential detection is a 3 × 3 × p small kernel that produces either a score
/// for a category, or a shape offset relative to the default box coordinates.
#[derive(Module, Debug)]
pub struct SSDPredictionHead<B: Backend> {
    pub conv_bbox: Conv2d<B>,
    pub conv_classifier: Conv2d<B>,
    n_anchors: usize,
    cls_cnt: usize,
}

impl<B: Backend> SSDPredictionHead<B> {
    /// `cls_cnt` counts the background class.
    pub fn new(
        device: &B::Device,
        layer: &SSDConvLayers,
        n_anchors: usize,
        cls_cnt: usize,
    ) -> Self {
        let channels = layer.output_size();

        let conv_bbox = Conv2dConfig::new([channels, n_anchors * 4], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        let conv_classifier = Conv2dConfig::new([channels, n_anchors * cls_cnt], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Self {
            conv_bbox,
            conv_classifier,
            n_anchors,
            cls_cnt,
        }
    }

    /// Returns box offsets `[B, H * W * A, 4]` and class logits `[B, H * W * A, cls_cnt]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let loc = flatten_predictions(self.conv_bbox.forward(x.clone()), 4);
        let conf = flatten_predictions(self.conv_classifier.forward(x), self.cls_cnt);

        (loc, conf)
    }

    pub fn n_anchors(&self) -> usize {
        self.n_anchors
    }
}

/// B = Batch Size
/// A = Anchor Boxes
/// H = Feature Height
/// W = Feature Width
/// N = Values per anchor
///
/// (B, A * N, H, W) -> (B, H, W, A * N) -> (B, H * W * A, N)
///
/// Rows come out in (row, column, anchor) order, the order of the default boxes.
pub fn flatten_predictions<B: Backend>(x: Tensor<B, 4>, values: usize) -> Tensor<B, 3> {
    let [batch_size, _, _, _] = x.dims();

    x.permute([0, 2, 3, 1])
        .reshape([batch_size as i32, -1, values as i32])
}

/// L2 normalization across channels with a learnable per-channel scale.
///
/// “ParseNet: Looking Wider to See Better”
/// Authors: Wei Liu, Andrew Rabinovich, Alexander C. Berg
/// Link (official): https://arxiv.org/abs/1506.04579
///
/// conv4_3 has a different feature scale than the other layers, SSD rescales it with a
/// scale initialized to 20 (Pg. 7 Liu et al.).
#[derive(Module, Debug)]
pub struct L2Normalize<B: Backend> {
    pub scale: Param<Tensor<B, 1>>,
}

const L2_EPS: f32 = 1e-5;

impl<B: Backend> L2Normalize<B> {
    pub fn new(device: &B::Device, channels: usize, initial_scale: f32) -> Self {
        Self {
            scale: Param::from_tensor(Tensor::full([channels], initial_scale, device)),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();

        let norm = x.clone().powf_scalar(2.0).sum_dim(1).add_scalar(L2_EPS).sqrt();
        let scale = self.scale.val().reshape([1, channels, 1, 1]);

        x / norm * scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::assert_vec_approx_eq;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    #[test]
    fn head_output_shapes() {
        let device = &NdArrayDevice::default();
        let head: SSDPredictionHead<B> =
            SSDPredictionHead::new(device, &SSDConvLayers::Conv9_2, 6, 21);

        let (loc, conf) = head.forward(Tensor::zeros([2, 256, 5, 5], device));

        assert_eq!(loc.dims(), [2, 150, 4]);
        assert_eq!(conf.dims(), [2, 150, 21]);
        assert_eq!(head.n_anchors(), 6);
    }

    #[test]
    fn flatten_follows_anchor_order() {
        let device = &NdArrayDevice::default();

        // 2 anchors x 2 values on a 1x2 map; channel c holds anchor c / 2, value c % 2
        let data: Vec<f32> = (0..4)
            .flat_map(|c| (0..2).map(move |w| (w * 100 + c) as f32))
            .collect();
        let x = Tensor::<B, 4>::from_data(TensorData::new(data, [1, 4, 1, 2]), device);

        let flat = flatten_predictions(x, 2);

        assert_eq!(flat.dims(), [1, 4, 2]);
        assert_vec_approx_eq(
            &flat.into_data().to_vec::<f32>().unwrap(),
            &[0.0, 1.0, 2.0, 3.0, 100.0, 101.0, 102.0, 103.0],
            0.0,
        );
    }

    #[test]
    fn l2_normalize_scales_unit_vectors() {
        let device = &NdArrayDevice::default();
        let norm: L2Normalize<B> = L2Normalize::new(device, 2, 20.0);

        let x = Tensor::<B, 4>::from_data(
            TensorData::new(vec![3.0f32, 0.0, 4.0, 0.0], [1, 2, 1, 2]),
            device,
        );

        let out = norm.forward(x).into_data().to_vec::<f32>().unwrap();

        // (3, 4) / 5 * 20, the zero column stays zero
        assert_vec_approx_eq(&out, &[12.0, 0.0, 16.0, 0.0], 1e-3);
    }
}
