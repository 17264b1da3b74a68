use std::sync::{Arc, Mutex};

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::{Int, TensorData},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::warn;

use crate::{
    boxes::x1y1x2y2_to_cxcywh,
    dataset::VocItem,
    error::{Result, SsdError},
    multibox::MultiBoxEncoder,
    transforms::pipeline::Transform,
};

/// A minibatch ready for the network and the loss.
#[derive(Clone, Debug)]
pub struct SSDBatch<B: Backend> {
    /// `[B, 3, size, size]`, BGR with the mean removed.
    pub images: Tensor<B, 4>,
    /// Regression targets `[B, A, 4]`.
    pub loc: Tensor<B, 3>,
    /// Anchor classes `[B, A]`, 0 is background.
    pub conf: Tensor<B, 2, Int>,
    pub ids: Vec<String>,
}

/// Turns [`VocItem`]s into encoded training targets.
#[derive(Clone, Debug)]
pub struct SSDBatcher {
    encoder: Arc<MultiBoxEncoder>,
    size: usize,
    flip_prob: f32,
    /// Draws one seed per sample for its augmentation.
    rng: Arc<Mutex<StdRng>>,
}

impl SSDBatcher {
    pub fn new(encoder: Arc<MultiBoxEncoder>, size: usize) -> Self {
        Self {
            encoder,
            size,
            flip_prob: 0.0,
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
        }
    }

    /// Probability of a random horizontal flip per sample.
    pub fn with_flip_prob(mut self, flip_prob: f32) -> Self {
        self.flip_prob = flip_prob;
        self
    }

    /// Makes the augmentation reproducible. With several loader workers the samples still
    /// reach the batcher in varying order.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    fn sample_rng(&self) -> StdRng {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        StdRng::seed_from_u64(rng.random())
    }

    /// Runs the transforms and the encoder on a single sample.
    pub fn prepare<B: Backend>(
        &self,
        item: VocItem,
        device: &B::Device,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 2>, Tensor<B, 1, Int>)> {
        let n_boxes = item.boxes.len();

        let (bboxes, labels) = if n_boxes == 0 {
            (None, None)
        } else {
            let flat: Vec<f32> = item.boxes.iter().flatten().copied().collect();
            let ids: Vec<i64> = item.labels.iter().map(|l| *l as i64).collect();

            (
                Some(Tensor::<B, 2>::from_data(
                    TensorData::new(flat, [n_boxes, 4]).convert::<B::FloatElem>(),
                    device,
                )),
                Some(Tensor::<B, 1, Int>::from_data(
                    TensorData::new(ids, [n_boxes]).convert::<B::IntElem>(),
                    device,
                )),
            )
        };

        let image = Transform::<B>::rgb_img_as_tensor(item.image, device);

        let mut t = Transform::new_seeded(image, bboxes, labels, self.sample_rng())
            .resize_triangular(self.size, self.size)?
            .random_horizontal_flip(self.flip_prob);

        let mut t = match t.clean_boxes() {
            Ok(t) => t,
            Err(SsdError::NoBoxes) => {
                warn!(id = %item.id, "no usable boxes, sample is all background");
                t.bboxes = None;
                t.labels = None;
                t
            }
            Err(e) => return Err(e),
        };

        let (image, bboxes, labels) = t.normalize().finish();

        let (loc, conf) = match (bboxes, labels) {
            (Some(bboxes), Some(labels)) => {
                self.encoder.encode(x1y1x2y2_to_cxcywh(bboxes), labels)
            }
            _ => self.encoder.encode_boxes::<B>(&[], &[], device),
        };

        Ok((image, loc, conf))
    }
}

impl<B: Backend> Batcher<B, VocItem, SSDBatch<B>> for SSDBatcher {
    fn batch(&self, items: Vec<VocItem>, device: &B::Device) -> SSDBatch<B> {
        let mut images = vec![];
        let mut locs = vec![];
        let mut confs = vec![];
        let mut ids = vec![];

        for item in items {
            let id = item.id.clone();

            match self.prepare::<B>(item, device) {
                Ok((image, loc, conf)) => {
                    images.push(image);
                    locs.push(loc);
                    confs.push(conf);
                    ids.push(id);
                }
                Err(e) => warn!(id = %id, error = %e, "dropping sample from batch"),
            }
        }

        if images.is_empty() {
            let n_anchors = self.encoder.len();

            return SSDBatch {
                images: Tensor::zeros([0, 3, self.size, self.size], device),
                loc: Tensor::zeros([0, n_anchors, 4], device),
                conf: Tensor::zeros([0, n_anchors], device),
                ids,
            };
        }

        SSDBatch {
            images: Tensor::stack(images, 0),
            loc: Tensor::stack(locs, 0),
            conf: Tensor::stack(confs, 0),
            ids,
        }
    }
}
