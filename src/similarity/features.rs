use image::{DynamicImage, GrayImage};
use imageproc::corners::corners_fast9;

use crate::card::{CardImage, Descriptor, StrategyKind};
use crate::similarity::{expect_descriptor, ImageComparator, SimilarityError};

const FAST_THRESHOLD: u8 = 30;
const PATCH_RADIUS: u32 = 8;
const DESCRIPTOR_BYTES: usize = 32;
const MAX_KEYPOINTS: usize = 400;

pub const DEFAULT_LOWE_RATIO: f32 = 0.6;
pub const DEFAULT_FEATURE_THRESHOLD: usize = 10;

/// Local-feature keypoint matching.
///
/// Keypoints are FAST-9 corners of the grayscale illustration crop, each
/// described by a 256-bit binary intensity-comparison descriptor. Two
/// images are matched with 2-nearest-neighbor Hamming search; a pair
/// counts as "good" only when the best distance beats the second-best by
/// the Lowe ratio, which rejects ambiguous matches. The similarity score
/// is the count of good pairs, so the comparison direction is inverted
/// relative to the distance-based strategies.
pub struct FeatureComparator {
    lowe_ratio: f32,
    threshold: usize,
}

impl FeatureComparator {
    pub fn new() -> Self {
        Self {
            lowe_ratio: DEFAULT_LOWE_RATIO,
            threshold: DEFAULT_FEATURE_THRESHOLD,
        }
    }

    /// Override the ratio-test bound.
    pub fn with_lowe_ratio(mut self, lowe_ratio: f32) -> Self {
        self.lowe_ratio = lowe_ratio;
        self
    }

    /// Override the good-match count required to call a duplicate.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    fn good_matches(&self, query: &[[u8; DESCRIPTOR_BYTES]], train: &[[u8; DESCRIPTOR_BYTES]]) -> usize {
        // The ratio test needs two neighbours; degenerate albums fall back
        // to exact matches.
        if train.len() < 2 {
            return query
                .iter()
                .filter(|q| train.iter().any(|t| hamming(q, t) == 0))
                .count();
        }
        let mut good = 0;
        for q in query {
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            for t in train {
                let distance = hamming(q, t);
                if distance < best {
                    second = best;
                    best = distance;
                } else if distance < second {
                    second = distance;
                }
            }
            if (best as f32) < self.lowe_ratio * second as f32 {
                good += 1;
            }
        }
        good
    }
}

impl Default for FeatureComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageComparator for FeatureComparator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Features
    }

    fn descript(&self, image: &mut CardImage) -> Result<Descriptor, SimilarityError> {
        if image.descriptor().is_some() {
            return expect_descriptor(self.kind(), image).map(|descriptor| descriptor.clone());
        }
        let gray = DynamicImage::ImageRgb8(image.illustration()?).to_luma8();
        let keypoints = extract_keypoints(&gray);
        let mut bytes = Vec::with_capacity(keypoints.len() * DESCRIPTOR_BYTES);
        for keypoint in &keypoints {
            bytes.extend_from_slice(keypoint);
        }
        let descriptor = Descriptor::new(self.kind(), bytes);
        image.record_descriptor(descriptor.clone());
        Ok(descriptor)
    }

    fn closest_matches<'a>(
        &self,
        reference: &CardImage,
        album: &[&'a CardImage],
        limit: usize,
    ) -> Result<Vec<(f64, &'a CardImage)>, SimilarityError> {
        let query = decode(expect_descriptor(self.kind(), reference)?, reference)?;
        let mut matches = Vec::with_capacity(album.len());
        for candidate in album {
            let train = decode(expect_descriptor(self.kind(), candidate)?, candidate)?;
            matches.push((self.good_matches(&query, &train) as f64, *candidate));
        }
        // Higher match count = more similar.
        matches.sort_by(|a, b| b.0.total_cmp(&a.0));
        matches.truncate(limit);
        Ok(matches)
    }

    fn is_duplicate(
        &self,
        reference: &CardImage,
        album: &[&CardImage],
    ) -> Result<bool, SimilarityError> {
        let matches = self.closest_matches(reference, album, 1)?;
        Ok(matches
            .first()
            .map(|(count, _)| *count >= self.threshold as f64)
            .unwrap_or(false))
    }
}

fn extract_keypoints(gray: &GrayImage) -> Vec<[u8; DESCRIPTOR_BYTES]> {
    let corners = corners_fast9(gray, FAST_THRESHOLD);
    let mut keypoints = Vec::new();
    for corner in corners {
        if let Some(descriptor) = binary_descriptor(gray, corner.x, corner.y) {
            keypoints.push(descriptor);
        }
        if keypoints.len() >= MAX_KEYPOINTS {
            break;
        }
    }
    keypoints
}

/// 256-bit binary descriptor from fixed intensity-comparison pairs in a
/// patch around the keypoint. Keypoints too close to the border are
/// skipped.
fn binary_descriptor(gray: &GrayImage, x: u32, y: u32) -> Option<[u8; DESCRIPTOR_BYTES]> {
    let (width, height) = gray.dimensions();
    if x < PATCH_RADIUS
        || y < PATCH_RADIUS
        || x + PATCH_RADIUS >= width
        || y + PATCH_RADIUS >= height
    {
        return None;
    }
    let mut descriptor = [0u8; DESCRIPTOR_BYTES];
    for i in 0..256u32 {
        let (dx1, dy1, dx2, dy2) = sample_pair(i);
        let p1 = gray.get_pixel((x as i32 + dx1) as u32, (y as i32 + dy1) as u32)[0];
        let p2 = gray.get_pixel((x as i32 + dx2) as u32, (y as i32 + dy2) as u32)[0];
        if p1 > p2 {
            descriptor[(i / 8) as usize] |= 1 << (i % 8);
        }
    }
    Some(descriptor)
}

/// Deterministic sampling pattern: two modular walks over the patch so the
/// pair offsets decorrelate across bit positions.
fn sample_pair(i: u32) -> (i32, i32, i32, i32) {
    let i = i as i32;
    (
        (i % 15) - 7,
        ((i / 15) % 15) - 7,
        ((i * 7) % 13) - 6,
        (((i * 7) / 13) % 13) - 6,
    )
}

fn decode(
    descriptor: &Descriptor,
    image: &CardImage,
) -> Result<Vec<[u8; DESCRIPTOR_BYTES]>, SimilarityError> {
    let bytes = descriptor.bytes();
    if bytes.len() % DESCRIPTOR_BYTES != 0 {
        return Err(SimilarityError::Malformed {
            kind: StrategyKind::Features,
            location: image.location().to_string(),
        });
    }
    Ok(bytes
        .chunks_exact(DESCRIPTOR_BYTES)
        .map(|chunk| {
            let mut keypoint = [0u8; DESCRIPTOR_BYTES];
            keypoint.copy_from_slice(chunk);
            keypoint
        })
        .collect())
}

fn hamming(a: &[u8; DESCRIPTOR_BYTES], b: &[u8; DESCRIPTOR_BYTES]) -> u32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn described(location: &str, pixels: RgbImage) -> CardImage {
        let mut card = CardImage::from_pixels(location, pixels);
        FeatureComparator::new().descript(&mut card).unwrap();
        card
    }

    // Deterministic block noise: strong corners whose neighborhoods are
    // all distinct, so the ratio test has unambiguous matches to accept.
    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let block_x = x / 10;
            let block_y = y / 10;
            let mixed = block_x
                .wrapping_mul(2654435761)
                .wrapping_add(block_y.wrapping_mul(40503));
            let v = (mixed >> 3) as u8;
            Rgb([v, v.wrapping_mul(3), v ^ 0x5a])
        })
    }

    #[test]
    fn textured_image_yields_keypoints() {
        let card = described("mem:a", textured(300, 420));
        assert!(!card.descriptor().unwrap().bytes().is_empty());
    }

    #[test]
    fn identical_images_are_duplicates() {
        let a = described("mem:a", textured(300, 420));
        let b = described("mem:b", textured(300, 420));
        let comparator = FeatureComparator::new();
        let matches = comparator.closest_matches(&a, &[&b], 1).unwrap();
        assert!(matches[0].0 >= DEFAULT_FEATURE_THRESHOLD as f64);
        assert!(comparator.is_duplicate(&a, &[&b]).unwrap());
    }

    #[test]
    fn featureless_image_matches_nothing() {
        let textured_card = described("mem:a", textured(300, 420));
        let blank = described("mem:blank", RgbImage::from_pixel(300, 420, Rgb([128, 128, 128])));
        let comparator = FeatureComparator::new();
        assert!(!comparator.is_duplicate(&blank, &[&textured_card]).unwrap());
    }

    #[test]
    fn empty_album_is_never_a_duplicate() {
        let a = described("mem:a", textured(300, 420));
        assert!(!FeatureComparator::new().is_duplicate(&a, &[]).unwrap());
    }

    #[test]
    fn closest_matches_prefers_higher_match_counts() {
        let reference = described("mem:ref", textured(300, 420));
        let twin = described("mem:twin", textured(300, 420));
        let blank = described("mem:blank", RgbImage::from_pixel(300, 420, Rgb([90, 90, 90])));
        let matches = FeatureComparator::new()
            .closest_matches(&reference, &[&blank, &twin], 2)
            .unwrap();
        assert_eq!(matches[0].1.location(), "mem:twin");
        assert!(matches[0].0 >= matches[1].0);
    }

    #[test]
    fn truncated_descriptor_is_malformed() {
        let a = described("mem:a", textured(300, 420));
        let mut bad = CardImage::from_pixels("mem:bad", textured(64, 64));
        bad.record_descriptor(Descriptor::new(StrategyKind::Features, vec![1, 2, 3]));
        let result = FeatureComparator::new().closest_matches(&a, &[&bad], 1);
        assert!(matches!(result, Err(SimilarityError::Malformed { .. })));
    }
}
