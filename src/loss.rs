use burn::nn::loss::HuberLossConfig;
use burn::prelude::*;
use burn::tensor::{TensorData, activation::log_softmax};

/// Negatives kept per positive anchor during hard negative mining.
pub const NEG_POS_RATIO: usize = 3;

/// The parts of the SSD objective for one minibatch, each a `[1]` tensor.
#[derive(Debug, Clone)]
pub struct MultiBoxLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub loc: Tensor<B, 1>,
    pub conf: Tensor<B, 1>,
}

/// Computes the cross-entropy loss for multi-class classification without requiring one-hot
/// encoding similar to how torch cross entropy works.
///
/// # Arguments
/// * `logits` - A 2D tensor of shape `[num_boxes, num_classes]` representing the predicted raw
///   scores (logits) for each class.
/// * `targets` - A 1D tensor of shape `[num_boxes]` containing the integer class labels for each
///   prediction. Each label should be in the range `[0, num_classes - 1]`.
///
/// # Returns
/// A 1D tensor of shape `[num_boxes]` containing the cross-entropy loss for each prediction.
///
/// Further reading:
///
/// Lau, R. (2025, March 5). Cross-Entropy, negative Log-Likelihood, and all that jazz.
///  Towards Data Science.
/// https://towardsdatascience.com/cross-entropy-negative-log-likelihood-and-all-that-jazz-47a95bd2e81/
pub fn cross_entropy_loss<B: Backend>(
    logits: Tensor<B, 2>,       // (predictions) [# of boxes, # Classes]
    targets: Tensor<B, 1, Int>, // (labels, horse, dog, cat, ect..) [# of boxes]
) -> Tensor<B, 1> {
    let [box_count] = targets.dims();

    //                        ⎛  exp ⎛x ⎞  ⎞
    //                        ⎜      ⎝ i⎠  ⎟
    //  log(softmax(x)) = log ⎜────────────⎟
    //               i        ⎜___         ⎟
    //                        ⎜╲   exp ⎛x ⎞⎟
    //                        ⎜╱       ⎝ i⎠⎟
    //                        ⎝‾‾‾         ⎠

    let log_probabilities = log_softmax(logits, 1);
    let targets = targets.reshape([box_count, 1]);

    // loss  = -log ⎛P ⎛y , x ⎞⎞
    //     i        ⎝  ⎝ i   i⎠⎠
    let nll = log_probabilities.gather(1, targets) * -1;

    nll.reshape([box_count])
}

/// Hard negative mining - Pg. 6 Liu et al.
///
/// After the matching step, most of the default boxes are negatives, especially when the
/// number of possible default boxes is large. This introduces a significant imbalance
/// between the positive and negative training examples. Instead of using all the negative
/// examples, we sort them using the highest confidence loss for each default box and pick
/// the top ones so that the ratio between the negatives and positives is at most 3:1.
///
/// `conf_loss` and `positive` are laid out image by image, `n_anchors` per image. Returns
/// 1.0 for every anchor that enters the confidence loss: all positives plus, per image, the
/// `ratio * positives` negatives with the highest loss.
pub fn hard_negative_mask(
    conf_loss: &[f32],
    positive: &[bool],
    n_anchors: usize,
    ratio: usize,
) -> Vec<f32> {
    let mut mask: Vec<f32> = positive.iter().map(|p| if *p { 1.0 } else { 0.0 }).collect();

    for (image, (losses, positives)) in conf_loss
        .chunks(n_anchors)
        .zip(positive.chunks(n_anchors))
        .enumerate()
    {
        let n_pos = positives.iter().filter(|p| **p).count();

        let mut negatives: Vec<usize> = (0..losses.len()).filter(|a| !positives[*a]).collect();
        negatives.sort_by(|a, b| losses[*b].total_cmp(&losses[*a]));

        for a in negatives.into_iter().take(n_pos * ratio) {
            mask[image * n_anchors + a] = 1.0;
        }
    }

    mask
}

/// Training objective - Pg. 5 Liu et al.
///
/// The overall objective loss function is a weighted sum of the localization loss (loc) and
/// the confidence loss (conf):
///
/// ```text
///                 ⎛1⎞
/// L(x, c, l, g) = ⎜─⎟ ⋅ (Lconf(x, c)) + α ⋅ Lloc(x, l, g))
///                 ⎝N⎠
/// ```
///
/// where N is the number of matched default boxes. If N = 0, we set the loss to 0.
///
/// `pred_loc` `[B, A, 4]` and `pred_conf` `[B, A, C]` come from the network, `t_loc` and
/// `t_conf` `[B, A]` from the encoder. Smooth L1 (Huber, delta 1) covers the positive
/// anchors, softmax cross-entropy the positives and the mined negatives, α = 1 and N counts
/// the positives of the whole batch.
pub fn calculate_loss<B: Backend>(
    pred_loc: Tensor<B, 3>,
    pred_conf: Tensor<B, 3>,
    t_loc: Tensor<B, 3>,
    t_conf: Tensor<B, 2, Int>,
    neg_pos_ratio: usize,
) -> MultiBoxLoss<B> {
    let device = pred_loc.device();
    let [batch_size, n_anchors, n_class] = pred_conf.dims();
    let n = batch_size * n_anchors;

    let pred_loc = pred_loc.reshape([n, 4]);
    let pred_conf = pred_conf.reshape([n, n_class]);
    let t_loc = t_loc.reshape([n, 4]);
    let t_conf = t_conf.reshape([n]);

    let positive: Vec<bool> = t_conf.clone().into_data().iter::<i64>().map(|c| c > 0).collect();
    let n_pos = positive.iter().filter(|p| **p).count();

    if n_pos == 0 {
        // keep the graph attached so a backward pass still reaches every parameter
        let zero = (pred_loc.sum() + pred_conf.sum()) * 0.0;

        return MultiBoxLoss {
            total: zero.clone(),
            loc: zero.clone(),
            conf: zero,
        };
    }

    let pos_mask = Tensor::<B, 1>::from_data(
        TensorData::new(
            positive.iter().map(|p| if *p { 1.0f32 } else { 0.0 }).collect::<Vec<_>>(),
            [n],
        )
        .convert::<B::FloatElem>(),
        &device,
    );

    let loc_loss = HuberLossConfig::new(1.0)
        .init()
        .forward_no_reduction(pred_loc, t_loc)
        .sum_dim(1)
        .reshape([n]);
    let loc_loss = (loc_loss * pos_mask).sum() / n_pos as f32;

    let conf_loss = cross_entropy_loss(pred_conf, t_conf);

    let losses: Vec<f32> = conf_loss.clone().detach().into_data().iter::<f32>().collect();
    let selected = Tensor::<B, 1>::from_data(
        TensorData::new(
            hard_negative_mask(&losses, &positive, n_anchors, neg_pos_ratio),
            [n],
        )
        .convert::<B::FloatElem>(),
        &device,
    );
    let conf_loss = (conf_loss * selected).sum() / n_pos as f32;

    MultiBoxLoss {
        total: loc_loss.clone() + conf_loss.clone(),
        loc: loc_loss,
        conf: conf_loss,
    }
}
