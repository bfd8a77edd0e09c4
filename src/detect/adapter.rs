use image::imageops::{self, FilterType};
use image::RgbImage;
use log::debug;
use thiserror::Error;

use crate::card::{CardImage, DecodeError};
use crate::detect::nms::non_max_suppression;
use crate::detect::scorer::{ScorerError, VisionScorer};
use crate::geometry::{remap_box, DetectionBox};

/// Physical card face is 63x88 mm. Detections far from that ratio are
/// partial or blurred cards, rejected before any descriptor work is spent
/// on them.
const CARD_ASPECT: f32 = 63.0 / 88.0;

pub const DEFAULT_SCALE_RATIO: f64 = 0.4;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_RATIO_TOLERANCE: f32 = 0.05;

const NMS_SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Scorer(#[from] ScorerError),
}

/// Extracts individual card sub-images from a cluttered photograph.
pub struct CardDetector<S> {
    scorer: S,
    scale_ratio: f64,
}

impl<S: VisionScorer> CardDetector<S> {
    pub fn new(scorer: S) -> Self {
        Self {
            scorer,
            scale_ratio: DEFAULT_SCALE_RATIO,
        }
    }

    /// Override the down-scale ratio applied before scoring.
    pub fn with_scale_ratio(mut self, ratio: f64) -> Self {
        self.scale_ratio = ratio;
        self
    }

    /// Detect card sub-images in `image`.
    ///
    /// The source is down-scaled by the configured ratio before scoring;
    /// surviving boxes are remapped to source coordinates before slicing,
    /// so the returned crops are full-resolution. Result order is
    /// unspecified. An undecodable source fails with no partial results.
    pub fn detect(
        &mut self,
        image: &mut CardImage,
        confidence_threshold: f32,
        ratio_tolerance: f32,
    ) -> Result<Vec<(RgbImage, f32)>, DetectError> {
        let original = image.pixels()?;
        let (source_w, source_h) = original.dimensions();
        let resized_w = ((source_w as f64 * self.scale_ratio).round() as u32).max(1);
        let resized_h = ((source_h as f64 * self.scale_ratio).round() as u32).max(1);
        let resized = imageops::resize(original, resized_w, resized_h, FilterType::Triangle);

        let cells = self.scorer.score(&resized)?;

        let mut boxes = Vec::new();
        for cell in &cells {
            let Some((class_id, confidence)) = argmax(&cell.class_scores) else {
                continue;
            };
            if confidence <= confidence_threshold {
                continue;
            }
            let center_x = cell.cx * resized_w as f32;
            let center_y = cell.cy * resized_h as f32;
            let w = cell.w * resized_w as f32;
            let h = cell.h * resized_h as f32;
            boxes.push(DetectionBox {
                x: (center_x - w / 2.0) as i32,
                y: (center_y - h / 2.0) as i32,
                w: w as i32,
                h: h as i32,
                class_id,
                confidence,
            });
        }

        let kept = non_max_suppression(&boxes, NMS_SCORE_THRESHOLD, NMS_IOU_THRESHOLD);

        let mut cards = Vec::new();
        for detected in kept {
            if detected.h <= 0 {
                continue;
            }
            let aspect = detected.w as f32 / detected.h as f32;
            if (aspect - CARD_ASPECT).abs() > ratio_tolerance {
                continue;
            }
            let Some(rect) = remap_box(&detected, self.scale_ratio) else {
                continue;
            };
            if rect.x >= source_w || rect.y >= source_h {
                continue;
            }
            let crop_w = rect.w.min(source_w - rect.x);
            let crop_h = rect.h.min(source_h - rect.y);
            if crop_w == 0 || crop_h == 0 {
                continue;
            }
            let crop = imageops::crop_imm(original, rect.x, rect.y, crop_w, crop_h).to_image();
            cards.push((crop, detected.confidence));
        }

        debug!(
            "detector {}: {} cell(s) -> {} box(es) -> {} card(s)",
            self.scorer.name(),
            cells.len(),
            boxes.len(),
            cards.len()
        );
        Ok(cards)
    }
}

fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((i, score)),
        }
    }
    best
}
