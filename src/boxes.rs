use burn::{
    prelude::Backend,
    tensor::{Tensor, TensorData},
};

use crate::config::MultiBoxConfig;
use crate::error::{Result, SsdError};

/// Smallest and largest default box scale of the intermediate feature maps, in percent of
/// the input size. The first map gets its own, smaller scale.
const MIN_RATIO: usize = 20;
const MAX_RATIO: usize = 90;

/// Splits a `[N, 4]` box tensor into its four `[N, 1]` coordinate columns.
pub fn boxes_to_components<B: Backend>(
    boxes: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
    (
        boxes.clone().narrow(1, 0, 1),
        boxes.clone().narrow(1, 1, 1),
        boxes.clone().narrow(1, 2, 1),
        boxes.narrow(1, 3, 1),
    )
}

pub fn cxcywh_to_x1y1x2y2<B: Backend>(a: Tensor<B, 2>) -> Tensor<B, 2> {
    let (cx, cy, w, h) = boxes_to_components(a);

    Tensor::cat(
        vec![
            cx.clone() - w.clone() * 0.5,
            cy.clone() - h.clone() * 0.5,
            cx + w * 0.5,
            cy + h * 0.5,
        ],
        1,
    )
}

pub fn x1y1x2y2_to_cxcywh<B: Backend>(a: Tensor<B, 2>) -> Tensor<B, 2> {
    let (x1, y1, x2, y2) = boxes_to_components(a);

    let w = x2 - x1.clone();
    let h = y2 - y1.clone();
    let cx = x1 + w.clone() * 0.5;
    let cy = y1 + h.clone() * 0.5;

    Tensor::cat(vec![cx, cy, w, h], 1)
}

/// Jaccard overlap of every box in `a` (`[N, 4]`) with every box in `b` (`[M, 4]`), both in
/// corner form. The result is `[N, M]`.
pub fn get_iou<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, _] = a.dims();
    let [m, _] = b.dims();

    let (ax1, ay1, ax2, ay2) = boxes_to_components(a);
    let (bx1, by1, bx2, by2) = boxes_to_components(b);

    // rows follow `a`, columns follow `b`
    let rows = |t: Tensor<B, 2>| -> Tensor<B, 2> { t.expand([n, m]) };
    let cols = |t: Tensor<B, 2>| -> Tensor<B, 2> { t.reshape::<2, _>([1, m]).expand([n, m]) };

    let area_a = rows((ax2.clone() - ax1.clone()) * (ay2.clone() - ay1.clone()));
    let area_b = cols((bx2.clone() - bx1.clone()) * (by2.clone() - by1.clone()));

    // Intersection corners: largest top-left, smallest bottom-right
    let x1 = rows(ax1).max_pair(cols(bx1));
    let y1 = rows(ay1).max_pair(cols(by1));
    let x2 = rows(ax2).min_pair(cols(bx2));
    let y2 = rows(ay2).min_pair(cols(by2));

    let intersection = (x2 - x1).clamp_min(0.0) * (y2 - y1).clamp_min(0.0);
    let union = area_a + area_b - intersection.clone();

    intersection / union
}

/// Minimum and maximum box scale of each feature map, relative to the input size.
///
/// The first map uses 0.1/0.2, the others are spread linearly between 0.2 and 0.9 in
/// integer percent steps, each map's maximum being the next map's minimum.
pub fn scale_sizes(n_scale: usize) -> Result<(Vec<f32>, Vec<f32>)> {
    if n_scale < 3 {
        return Err(SsdError::InvalidConfig(format!(
            "at least 3 scales are required, got {n_scale}"
        )));
    }

    let step = (MAX_RATIO - MIN_RATIO) / (n_scale - 2);

    let mut min_sizes = vec![0.1];
    let mut max_sizes = vec![0.2];

    for ratio in (MIN_RATIO..=MAX_RATIO).step_by(step) {
        min_sizes.push(ratio as f32 / 100.0);
        max_sizes.push((ratio + step) as f32 / 100.0);
    }

    min_sizes.truncate(n_scale);
    max_sizes.truncate(n_scale);

    Ok((min_sizes, max_sizes))
}

/// Number of default boxes per feature map cell: two square boxes plus one pair per
/// aspect ratio.
pub fn get_box_count_for_layer(aspect_ratios: &[f32]) -> usize {
    2 + 2 * aspect_ratios.len()
}

/// `(width, height)` of the default boxes of a single cell, in anchor order.
pub fn get_default_boxes(min_size: f32, max_size: f32, aspect_ratios: &[f32]) -> Vec<(f32, f32)> {
    let mut box_sizes = Vec::with_capacity(get_box_count_for_layer(aspect_ratios));

    box_sizes.push((min_size, min_size));

    let s = f32::sqrt(min_size * max_size);
    box_sizes.push((s, s));

    for ar in aspect_ratios {
        let r = f32::sqrt(*ar);
        box_sizes.push((min_size * r, min_size / r));
        box_sizes.push((min_size / r, min_size * r));
    }

    box_sizes
}

/// Centers of the cells of a `k x k` feature map, `(i + 0.5) / k`.
pub fn get_default_box_centers(k: usize) -> Vec<f32> {
    (0..k).map(|i| (i as f32 + 0.5) / k as f32).collect()
}

/// Every anchor of the configured feature maps in `(cx, cy, w, h)` form, normalized to
/// the input size.
///
/// Ordering is scale, then grid row, then grid column, then the per-cell order of
/// [`get_default_boxes`]. The prediction heads flatten their outputs the same way.
pub fn generate_default_boxes(config: &MultiBoxConfig) -> Result<Vec<[f32; 4]>> {
    if config.grids.len() != config.n_scale || config.aspect_ratios.len() != config.n_scale {
        return Err(SsdError::InvalidConfig(format!(
            "{} scales but {} grids and {} aspect ratio groups",
            config.n_scale,
            config.grids.len(),
            config.aspect_ratios.len()
        )));
    }

    let (min_sizes, max_sizes) = scale_sizes(config.n_scale)?;

    let mut default_boxes = vec![];

    for k in 0..config.n_scale {
        let centers = get_default_box_centers(config.grids[k]);
        let sizes = get_default_boxes(min_sizes[k], max_sizes[k], &config.aspect_ratios[k]);

        for cy in &centers {
            for cx in &centers {
                for (w, h) in &sizes {
                    default_boxes.push([*cx, *cy, *w, *h]);
                }
            }
        }
    }

    Ok(default_boxes)
}

pub fn default_boxes_tensor<B: Backend>(boxes: &[[f32; 4]], device: &B::Device) -> Tensor<B, 2> {
    let flat: Vec<f32> = boxes.iter().flatten().copied().collect();

    Tensor::from_data(
        TensorData::new(flat, [boxes.len(), 4]).convert::<B::FloatElem>(),
        device,
    )
}

/// Regression targets that move default boxes `d` onto ground truth boxes `g`, both
/// `[N, 4]` in center form.
pub fn box_regression<B: Backend>(
    g: Tensor<B, 2>,
    d: Tensor<B, 2>,
    (v_center, v_size): (f32, f32),
) -> Tensor<B, 2> {
    let (gx, gy, gw, gh) = boxes_to_components(g);
    let (dx, dy, dw, dh) = boxes_to_components(d);

    //      Gx - Dx
    // tx = ───────
    //      Dw * v0

    let tx = (gx - dx) / (dw.clone() * v_center);
    let ty = (gy - dy) / (dh.clone() * v_center);

    //          ⎛Gw⎞
    // tw = log ⎜──⎟ / v1
    //          ⎝Dw⎠

    let tw = (gw / dw).log() / v_size;
    let th = (gh / dh).log() / v_size;

    Tensor::cat(vec![tx, ty, tw, th], 1)
}

/// Inverse of [`box_regression`]: applies predicted offsets `p` to default boxes `d`,
/// returning center form boxes.
pub fn box_generation<B: Backend>(
    p: Tensor<B, 2>,
    d: Tensor<B, 2>,
    (v_center, v_size): (f32, f32),
) -> Tensor<B, 2> {
    let (px, py, pw, ph) = boxes_to_components(p);
    let (dx, dy, dw, dh) = boxes_to_components(d);

    let cx = px * v_center * dw.clone() + dx;
    let cy = py * v_center * dh.clone() + dy;
    let w = (pw * v_size).exp() * dw;
    let h = (ph * v_size).exp() * dh;

    Tensor::cat(vec![cx, cy, w, h], 1)
}
