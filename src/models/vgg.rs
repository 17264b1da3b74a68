use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::MaxPool2d;
use burn::nn::pool::MaxPool2dConfig;
use burn::tensor::activation::relu;
use burn::{
    module::Module,
    tensor::{Tensor, backend::Backend},
};

/// SSD uses VGG-16 Type D as its base network
///
/// “Very Deep Convolutional Networks for Large-Scale Image Recognition”
/// Authors: Karen Simonyan, Andrew Zisserman
/// Link (official): https://arxiv.org/abs/1409.1556
///
/// Pg. 7 Liu et al.
///
/// Base network Our experiments are all based on VGG16 [15], which is pre-trained on the ILSVRC
/// CLS-LOC dataset [16]. Similar to DeepLab-LargeFOV [17], we convert fc6 and fc7 to convolutional
/// layers, subsample parameters from fc6 and fc7, change pool5 from 2 × 2 − s2 to 3 × 3 − s1,
/// and use the à trous algorithm [18] to fill the ”holes”. We remove all the dropout layers
/// and the fc8 layer.
///
/// ```text
///     D
/// -----------
///  conv3-64      x2   300x300
///  conv3-128     x2   150x150
///  conv3-256     x3    75x75
///  conv3-512     x3    38x38  -> conv4_3
///  conv3-512     x3    19x19
///  pool5 3x3-s1
///  conv6 3x3-1024, dilation 6 (was FC6)
///  conv7 1x1-1024 (was FC7)   -> conv7
/// ```
///
/// The network is trained from scratch, no ImageNet weights are loaded.
#[derive(Module, Debug)]
pub struct VGG16<B: Backend> {
    conv1_1: Conv2d<B>,
    conv1_2: Conv2d<B>,
    pool1: MaxPool2d,

    conv2_1: Conv2d<B>,
    conv2_2: Conv2d<B>,
    pool2: MaxPool2d,

    conv3_1: Conv2d<B>,
    conv3_2: Conv2d<B>,
    conv3_3: Conv2d<B>,
    pool3: MaxPool2d,

    conv4_1: Conv2d<B>,
    conv4_2: Conv2d<B>,
    conv4_3: Conv2d<B>,
    pool4: MaxPool2d,

    conv5_1: Conv2d<B>,
    conv5_2: Conv2d<B>,
    conv5_3: Conv2d<B>,
    pool5: MaxPool2d,

    conv6: Conv2d<B>,
    conv7: Conv2d<B>,
}

fn conv3x3<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

fn pool2x2() -> MaxPool2d {
    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()
}

impl<B: Backend> VGG16<B> {
    pub fn new(device: &B::Device) -> Self {
        // pool3 pads by one so 75x75 maps to 38x38, the ceil mode of the reference model.
        // Inputs are ReLU outputs, so the padding never wins the max.
        let pool3 = MaxPool2dConfig::new([2, 2])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // 3x3-s1 keeps 19x19
        let pool5 = MaxPool2dConfig::new([3, 3])
            .with_strides([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // Conv6: 3x3x1024 à trous, replaces FC6
        let conv6 = Conv2dConfig::new([512, 1024], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(6, 6))
            .with_dilation([6, 6])
            .init(device);

        // Conv7: 1x1x1024, replaces FC7
        let conv7 = Conv2dConfig::new([1024, 1024], [1, 1]).init(device);

        Self {
            conv1_1: conv3x3([3, 64], device),
            conv1_2: conv3x3([64, 64], device),
            pool1: pool2x2(),
            conv2_1: conv3x3([64, 128], device),
            conv2_2: conv3x3([128, 128], device),
            pool2: pool2x2(),
            conv3_1: conv3x3([128, 256], device),
            conv3_2: conv3x3([256, 256], device),
            conv3_3: conv3x3([256, 256], device),
            pool3,
            conv4_1: conv3x3([256, 512], device),
            conv4_2: conv3x3([512, 512], device),
            conv4_3: conv3x3([512, 512], device),
            pool4: pool2x2(),
            conv5_1: conv3x3([512, 512], device),
            conv5_2: conv3x3([512, 512], device),
            conv5_3: conv3x3([512, 512], device),
            pool5,
            conv6,
            conv7,
        }
    }

    /// Returns the ReLU outputs of conv4_3 (`[B, 512, 38, 38]`) and conv7
    /// (`[B, 1024, 19, 19]`) for a `[B, 3, 300, 300]` input.
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        // Convolutional layer 1
        let x = relu(self.conv1_1.forward(input));
        let x = relu(self.conv1_2.forward(x));
        let x = self.pool1.forward(x); // 150x150

        // Convolutional layer 2
        let x = relu(self.conv2_1.forward(x));
        let x = relu(self.conv2_2.forward(x));
        let x = self.pool2.forward(x); // 75x75

        // Convolutional layer 3
        let x = relu(self.conv3_1.forward(x));
        let x = relu(self.conv3_2.forward(x));
        let x = relu(self.conv3_3.forward(x));
        let x = self.pool3.forward(x); // 38x38

        // Convolutional layer 4
        let x = relu(self.conv4_1.forward(x));
        let x = relu(self.conv4_2.forward(x));
        let conv4_3_out = relu(self.conv4_3.forward(x));
        let x = self.pool4.forward(conv4_3_out.clone()); // 19x19

        // Convolutional layer 5
        let x = relu(self.conv5_1.forward(x));
        let x = relu(self.conv5_2.forward(x));
        let x = relu(self.conv5_3.forward(x));
        let x = self.pool5.forward(x);

        // Convolutional layers 6, 7
        let x = relu(self.conv6.forward(x));
        let conv7_out = relu(self.conv7.forward(x));

        (conv4_3_out, conv7_out)
    }
}
