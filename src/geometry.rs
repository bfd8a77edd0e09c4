//! Detection-space to source-space box remapping.
//!
//! The detector scores a down-scaled copy of the source image, so its boxes
//! live in a resized coordinate space. Remapping restores source-image pixel
//! coordinates with exact integer arithmetic: `original = round(detected / r)`.

/// Axis-aligned box in the resized detection space. Transient: exists only
/// for the duration of one detection call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub class_id: usize,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
}

/// Pixel rectangle in source-image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Remap a detection-space box back to source-image coordinates.
///
/// `ratio` is the down-scale factor the source image was resized by before
/// scoring (0 < ratio <= 1). Negative box coordinates are clamped to 0. A
/// box whose remapped width or height collapses to 0 yields `None` and must
/// be discarded by the caller.
pub fn remap_box(detected: &DetectionBox, ratio: f64) -> Option<PixelRect> {
    if !(ratio > 0.0 && ratio <= 1.0) {
        return None;
    }

    let left = detected.x.max(0);
    let top = detected.y.max(0);
    let right = (detected.x + detected.w).max(0);
    let bottom = (detected.y + detected.h).max(0);

    let x = scale_coord(left, ratio);
    let y = scale_coord(top, ratio);
    let w = scale_coord(right, ratio).saturating_sub(x);
    let h = scale_coord(bottom, ratio).saturating_sub(y);

    if w == 0 || h == 0 {
        return None;
    }
    Some(PixelRect { x, y, w, h })
}

fn scale_coord(coord: i32, ratio: f64) -> u32 {
    (coord as f64 / ratio).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_box(x: i32, y: i32, w: i32, h: i32) -> DetectionBox {
        DetectionBox {
            x,
            y,
            w,
            h,
            class_id: 0,
            confidence: 0.9,
        }
    }

    #[test]
    fn remap_scales_by_inverse_ratio() {
        let rect = remap_box(&card_box(20, 20, 50, 70), 0.4).unwrap();
        assert_eq!(rect, PixelRect { x: 50, y: 50, w: 125, h: 175 });
    }

    #[test]
    fn remap_clamps_negative_coordinates() {
        let rect = remap_box(&card_box(-10, -4, 50, 70), 0.5).unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 0);
        // Only the visible part of the box survives.
        assert_eq!(rect.w, 80);
        assert_eq!(rect.h, 132);
    }

    #[test]
    fn remap_discards_collapsed_boxes() {
        assert!(remap_box(&card_box(-60, 10, 50, 70), 0.4).is_none());
        assert!(remap_box(&card_box(10, 10, 0, 70), 0.4).is_none());
    }

    #[test]
    fn remap_rejects_invalid_ratio() {
        assert!(remap_box(&card_box(10, 10, 50, 70), 0.0).is_none());
        assert!(remap_box(&card_box(10, 10, 50, 70), 1.5).is_none());
    }

    #[test]
    fn remap_is_inverse_consistent_within_one_pixel() {
        for ratio in [0.25, 0.4, 0.5, 0.75, 1.0] {
            for (x, y, w, h) in [(3, 7, 41, 59), (0, 0, 63, 88), (17, 90, 126, 176)] {
                let rect = remap_box(&card_box(x, y, w, h), ratio).unwrap();
                let back_x = (rect.x as f64 * ratio).round() as i32;
                let back_y = (rect.y as f64 * ratio).round() as i32;
                let back_w = (rect.w as f64 * ratio).round() as i32;
                let back_h = (rect.h as f64 * ratio).round() as i32;
                assert!((back_x - x).abs() <= 1, "x drift at ratio {ratio}");
                assert!((back_y - y).abs() <= 1, "y drift at ratio {ratio}");
                assert!((back_w - w).abs() <= 1, "w drift at ratio {ratio}");
                assert!((back_h - h).abs() <= 1, "h drift at ratio {ratio}");
            }
        }
    }
}
