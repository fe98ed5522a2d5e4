use crate::detect::result::RawPrediction;

/// Intersection-over-union of two corner-form boxes.
pub fn iou(a: &RawPrediction, b: &RawPrediction) -> f32 {
    let left = a.x1.max(b.x1);
    let right = a.x2.min(b.x2);
    let top = a.y1.max(b.y1);
    let bottom = a.y2.min(b.y2);
    let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Greedy per-class non-max suppression.
///
/// Sorts by descending confidence and drops any box overlapping an already kept
/// box of the same class by more than `iou_threshold`.
pub fn non_max_suppression(xs: &mut Vec<RawPrediction>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_index == xs[index].class_index
                && iou(&xs[prev_index], &xs[index]) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
