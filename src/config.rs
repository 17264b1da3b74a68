use burn::{
    config::Config,
    optim::{SgdConfig, momentum::MomentumConfig},
};
use {argh::FromArgs, std::fmt::Debug};

/// Side length of the square network input.
pub const SIZE: usize = 300;

/// “SSD: Single Shot MultiBox Detector”
/// Authors: Wei Liu, Dragomir Anguelov, Dumitru Erhan, Christian Szegedy,
///          Scott Reed, Cheng-Yang Fu, Alexander C. Berg
/// Link (official): https://arxiv.org/abs/1512.02325
///
/// Default boxes and aspect ratios - Section 2.2
///
/// We associate a set of default bounding boxes with each feature map cell, for multiple
/// feature maps at the top of the network. The default boxes tile the feature map in a
/// convolutional manner, so that the position of each box relative to its corresponding
/// cell is fixed.
///
/// `grids` and `aspect_ratios` hold one entry per source feature map, from the finest
/// (38x38) to the coarsest (1x1). Each aspect ratio `ar` adds the pair `ar` and `1/ar`.
#[derive(Config, Debug)]
pub struct MultiBoxConfig {
    pub n_scale: usize,
    pub grids: Vec<usize>,
    pub aspect_ratios: Vec<Vec<f32>>,
    #[config(default = 0.1)]
    pub variance_center: f32,
    #[config(default = 0.2)]
    pub variance_size: f32,
    /// Minimum IoU for an anchor to be a positive match.
    #[config(default = 0.5)]
    pub threshold: f32,
}

impl MultiBoxConfig {
    /// The SSD300 layout: 6 scales, 8732 anchors.
    pub fn ssd300() -> Self {
        Self::new(
            6,
            vec![38, 19, 10, 5, 3, 1],
            vec![
                vec![2.0],
                vec![2.0, 3.0],
                vec![2.0, 3.0],
                vec![2.0, 3.0],
                vec![2.0],
                vec![2.0],
            ],
        )
    }

    pub fn variance(&self) -> (f32, f32) {
        (self.variance_center, self.variance_size)
    }
}

/// Training hyper-parameters, stored next to the snapshots as `config.json`.
#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: SgdConfig,
    pub multibox: MultiBoxConfig,
    #[config(default = 0.01)]
    pub learning_rate: f64,
    #[config(default = 1000)]
    pub iterations: usize,
    #[config(default = 100)]
    pub snapshot_interval: usize,
    #[config(default = 10)]
    pub log_interval: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 1)]
    pub seed: u64,
    /// Probability of a random horizontal flip per sample, 0 disables augmentation.
    #[config(default = 0.0)]
    pub flip_prob: f32,
    /// Keep objects flagged `difficult` in the annotations.
    #[config(default = true)]
    pub use_difficult: bool,
}

impl TrainingConfig {
    /// MomentumSGD with lr 0.01 and momentum 0.9 over the SSD300 anchor layout.
    pub fn ssd300() -> Self {
        let momentum = MomentumConfig::new()
            .with_momentum(0.9)
            .with_dampening(0.0);

        Self::new(
            SgdConfig::new().with_momentum(Some(momentum)),
            MultiBoxConfig::ssd300(),
        )
    }
}

#[derive(FromArgs, PartialEq, Debug)]
/// Train and run an SSD300 detector on Pascal VOC data.
pub struct SSDCmd {
    #[argh(subcommand)]
    pub commands: Commands,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Commands {
    Train(SubCommandTrain),
    Infer(SubCommandInfer),
}

#[derive(FromArgs, PartialEq, Debug)]
/// Train an SSD model on a Pascal VOC directory
#[argh(subcommand, name = "train")]
pub struct SubCommandTrain {
    #[argh(option)]
    /// VOC root containing Annotations/, ImageSets/ and JPEGImages/
    pub root: String,
    #[argh(option)]
    /// minibatch size, overrides the config file
    pub batchsize: Option<usize>,
    #[argh(option)]
    /// number of data loading workers, overrides the config file
    pub loaderjob: Option<usize>,
    #[argh(option, default = "-1")]
    /// GPU index, negative for the CPU
    pub gpu: i32,
    #[argh(option, default = "String::from(\"result\")")]
    /// output directory for snapshots and the log
    pub out: String,
    #[argh(option, default = "String::from(\"trainval\")")]
    /// image set under ImageSets/Main to train on
    pub split: String,
    #[argh(option)]
    /// iteration of a model_iter_<n> snapshot in the output directory to resume from
    pub resume: Option<usize>,
    #[argh(option)]
    /// training config JSON, defaults to the SSD300 settings
    pub config: Option<String>,
    #[argh(option)]
    /// comma separated subset of VOC class names to learn, e.g. 'dog,cat,person'
    pub classes: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Detect objects in a single image with a trained snapshot
#[argh(subcommand, name = "infer")]
pub struct SubCommandInfer {
    #[argh(option)]
    /// image path to run inference on
    pub image: String,
    #[argh(option)]
    /// model snapshot to load
    pub model: String,
    #[argh(option, default = "String::from(\"ssd300_output.jpg\")")]
    /// where to write the annotated image
    pub out: String,
    #[argh(option, default = "0.45")]
    /// iou above which overlapping detections of one class are suppressed
    pub nms_threshold: f32,
    #[argh(option, default = "0.6")]
    /// minimum class score for a detection
    pub score_threshold: f32,
    #[argh(option, default = "-1")]
    /// GPU index, negative for the CPU
    pub gpu: i32,
    #[argh(option)]
    /// comma separated class subset the snapshot was trained with
    pub classes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssd300_multibox_defaults() {
        let config = MultiBoxConfig::ssd300();

        assert_eq!(config.n_scale, 6);
        assert_eq!(config.grids, vec![38, 19, 10, 5, 3, 1]);
        assert_eq!(config.variance(), (0.1, 0.2));
        assert_eq!(config.threshold, 0.5);
    }

    #[test]
    fn training_config_defaults() {
        let config = TrainingConfig::ssd300();

        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.iterations, 1000);
        assert_eq!(config.snapshot_interval, 100);
        assert_eq!(config.log_interval, 10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.num_workers, 2);
    }

    #[test]
    fn training_config_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        TrainingConfig::ssd300()
            .with_batch_size(4)
            .save(&path)
            .unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.batch_size, 4);
        assert_eq!(loaded.multibox.grids, vec![38, 19, 10, 5, 3, 1]);
    }

    #[test]
    fn train_args_parse() {
        let cmd = SSDCmd::from_args(
            &["voc-ssd"],
            &["train", "--root", "/data/VOC2012", "--batchsize", "8"],
        )
        .unwrap();

        match cmd.commands {
            Commands::Train(train) => {
                assert_eq!(train.root, "/data/VOC2012");
                assert_eq!(train.batchsize, Some(8));
                assert_eq!(train.gpu, -1);
                assert_eq!(train.out, "result");
                assert_eq!(train.split, "trainval");
            }
            Commands::Infer(_) => panic!("expected the train subcommand"),
        }
    }
}
