use std::cmp::Ordering;

use crate::geometry::DetectionBox;

/// Collapse overlapping detections into one box per physical object.
///
/// Boxes below `score_threshold` are dropped outright. Among the rest,
/// higher confidence wins; ties are broken by first-seen order. A box is
/// suppressed when its IoU with an already-kept box exceeds
/// `iou_threshold`. Running the suppression on its own output is a no-op.
pub fn non_max_suppression(
    boxes: &[DetectionBox],
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<DetectionBox> {
    let mut order: Vec<usize> = (0..boxes.len())
        .filter(|&i| boxes[i].confidence >= score_threshold)
        .collect();
    order.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut kept: Vec<DetectionBox> = Vec::new();
    for i in order {
        let candidate = boxes[i];
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &DetectionBox, b: &DetectionBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.w).min(b.x + b.w);
    let y2 = (a.y + a.h).min(b.y + b.h);

    let inter = ((x2 - x1).max(0) as f32) * ((y2 - y1).max(0) as f32);
    let area_a = (a.w.max(0) as f32) * (a.h.max(0) as f32);
    let area_b = (b.w.max(0) as f32) * (b.h.max(0) as f32);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}
