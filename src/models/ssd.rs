use std::path::Path;

use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2d;
use burn::nn::conv::Conv2dConfig;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::activation::relu;
use burn::{
    module::Module,
    tensor::{Tensor, backend::Backend},
};
use tracing::info;

use crate::error::{Result, SsdError};
use crate::layers::SSDConvLayers;
use crate::models::head::{L2Normalize, SSDPredictionHead};
use crate::models::vgg::VGG16;

/// “SSD: Single Shot MultiBox Detector”
/// Authors: Wei Liu, Dragomir Anguelov, Dumitru Erhan, Christian Szegedy,
///          Scott Reed, Cheng-Yang Fu, Alexander C. Berg
/// Link (official): https://arxiv.org/abs/1512.02325
///
/// SSD300 (Fig 2, Pg 4): the VGG16 base, extra feature layers that halve the map size and
/// one prediction head per source map.
#[derive(Module, Debug)]
pub struct SSD<B: Backend> {
    pub vgg16: VGG16<B>,
    norm4_3: L2Normalize<B>,
    conv8_1: Conv2d<B>,
    conv8_2: Conv2d<B>,
    conv9_1: Conv2d<B>,
    conv9_2: Conv2d<B>,
    conv10_1: Conv2d<B>,
    conv10_2: Conv2d<B>,
    conv11_1: Conv2d<B>,
    conv11_2: Conv2d<B>,
    pub ssd_pred_heads: Vec<SSDPredictionHead<B>>,
    cls_cnt: usize,
}

impl<B: Backend> SSD<B> {
    /// `cls_cnt` counts the background class, `n_anchors` holds the anchors per cell of
    /// each source layer, finest first.
    pub fn new(device: &B::Device, cls_cnt: usize, n_anchors: &[usize]) -> Self {
        let norm4_3 = L2Normalize::new(device, SSDConvLayers::Conv4_3.output_size(), 20.0);

        // 19x19 => 10x10 - Conv8_2: 1x1x256/Conv: 3x3x512-s2 (Fig 2, Pg 4)
        let conv8_1: Conv2d<B> = Conv2dConfig::new([1024, 256], [1, 1]).init(device);
        let conv8_2: Conv2d<B> = Conv2dConfig::new([256, 512], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_stride([2, 2])
            .init(device);

        // 10x10 => 5x5 - Conv9_2: 1x1x128/Conv: 3x3x256-s2 (Fig 2, Pg 4)
        let conv9_1: Conv2d<B> = Conv2dConfig::new([512, 128], [1, 1]).init(device);
        let conv9_2: Conv2d<B> = Conv2dConfig::new([128, 256], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_stride([2, 2])
            .init(device);

        // 5x5 => 3x3 - Conv10_2: 1x1x128/Conv: 3x3x256-s1 (Fig 2, Pg 4)
        let conv10_1: Conv2d<B> = Conv2dConfig::new([256, 128], [1, 1]).init(device);
        let conv10_2: Conv2d<B> = Conv2dConfig::new([128, 256], [3, 3]).init(device);

        // 3x3 => 1x1 - Conv11_2: 1x1x128/Conv: 3x3x256-s1 (Fig 2, Pg 4)
        let conv11_1: Conv2d<B> = Conv2dConfig::new([256, 128], [1, 1]).init(device);
        let conv11_2: Conv2d<B> = Conv2dConfig::new([128, 256], [3, 3]).init(device);

        // conv4_3, conv7 (was FC7), conv8_2, conv9_2, conv10_2, conv11_2
        let ssd_pred_heads = SSDConvLayers::as_list()
            .iter()
            .zip(n_anchors)
            .map(|(layer, n)| SSDPredictionHead::new(device, layer, *n, cls_cnt))
            .collect();

        SSD {
            vgg16: VGG16::new(device),
            norm4_3,
            conv8_1,
            conv8_2,
            conv9_1,
            conv9_2,
            conv10_1,
            conv10_2,
            conv11_1,
            conv11_2,
            ssd_pred_heads,
            cls_cnt,
        }
    }

    /// Builds the network and loads the weights of a snapshot written with
    /// [`CompactRecorder`].
    pub fn from_file(
        path: &Path,
        device: &B::Device,
        cls_cnt: usize,
        n_anchors: &[usize],
    ) -> Result<Self> {
        let record = CompactRecorder::new()
            .load(path.to_path_buf(), device)
            .map_err(|e| SsdError::Recorder {
                path: path.to_path_buf(),
                msg: format!("{e:?}"),
            })?;

        info!(path = %path.display(), "loaded model weights");

        Ok(Self::new(device, cls_cnt, n_anchors).load_record(record))
    }

    pub fn cls_cnt(&self) -> usize {
        self.cls_cnt
    }

    /// The six source feature maps, finest first.
    pub fn feature_maps(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 6] {
        let (conv4_3_out, conv7_out) = self.vgg16.forward(input);

        // Convolutional layer 8 - 10x10
        let x = relu(self.conv8_1.forward(conv7_out.clone()));
        let conv8_2_out = relu(self.conv8_2.forward(x));

        // Convolutional layer 9 - 5x5
        let x = relu(self.conv9_1.forward(conv8_2_out.clone()));
        let conv9_2_out = relu(self.conv9_2.forward(x));

        // Convolutional layer 10 - 3x3
        let x = relu(self.conv10_1.forward(conv9_2_out.clone()));
        let conv10_2_out = relu(self.conv10_2.forward(x));

        // Convolutional layer 11 - 1x1
        let x = relu(self.conv11_1.forward(conv10_2_out.clone()));
        let conv11_2_out = relu(self.conv11_2.forward(x));

        [
            self.norm4_3.forward(conv4_3_out),
            conv7_out,
            conv8_2_out,
            conv9_2_out,
            conv10_2_out,
            conv11_2_out,
        ]
    }

    /// Runs the network on a `[B, 3, 300, 300]` batch.
    ///
    /// Returns the box offsets `[B, A, 4]` and class logits `[B, A, cls_cnt]`, rows in the
    /// order of the default boxes: scale, then row, then column, then anchor.
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let outputs = self.feature_maps(input);

        let (box_predictors, class_predictors): (Vec<_>, Vec<_>) = outputs
            .into_iter()
            .zip(self.ssd_pred_heads.iter())
            .map(|(conv_out, head)| head.forward(conv_out))
            .unzip();

        // Shape { dims: [B, 8732, 4] } and { dims: [B, 8732, 21] }
        (
            Tensor::cat(box_predictors, 1),
            Tensor::cat(class_predictors, 1),
        )
    }
}
