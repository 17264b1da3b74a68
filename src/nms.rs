/// A scored box for one class, in normalized corner form.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// 0-based class index (background excluded).
    pub label: usize,
    pub score: f32,
    pub bbox: [f32; 4],
}

impl Detection {
    /// Box scaled to an image of the given size, in pixels.
    pub fn to_pixels(&self, width: u32, height: u32) -> [f32; 4] {
        let (w, h) = (width as f32, height as f32);
        [
            self.bbox[0] * w,
            self.bbox[1] * h,
            self.bbox[2] * w,
            self.bbox[3] * h,
        ]
    }
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = iw * ih;

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union <= 0.0 { 0.0 } else { intersection / union }
}

/// Greedy non-maximum suppression within one class.
///
/// Candidates are visited by descending score; a candidate is kept unless it overlaps an
/// already kept box by more than `iou_threshold`.
pub fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();

    for candidate in candidates {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }

    kept
}

/// Runs [`nms`] separately for each class and merges the survivors by descending score.
pub fn class_nms(candidates: Vec<Detection>, iou_threshold: f32, top_k: usize) -> Vec<Detection> {
    let n_class = candidates.iter().map(|d| d.label + 1).max().unwrap_or(0);
    let mut by_class: Vec<Vec<Detection>> = vec![Vec::new(); n_class];

    for candidate in candidates {
        by_class[candidate.label].push(candidate);
    }

    let mut detections: Vec<Detection> = by_class
        .into_iter()
        .flat_map(|group| nms(group, iou_threshold))
        .collect();

    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    detections.truncate(top_k);
    detections
}
