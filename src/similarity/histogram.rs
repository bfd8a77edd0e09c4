use image::RgbImage;

use crate::card::{CardImage, Descriptor, StrategyKind};
use crate::similarity::{expect_descriptor, ImageComparator, SimilarityError};

const BINS_PER_CHANNEL: usize = 8;
const BIN_WIDTH: u32 = 256 / BINS_PER_CHANNEL as u32;
const DESCRIPTOR_LEN: usize = BINS_PER_CHANNEL * BINS_PER_CHANNEL * BINS_PER_CHANNEL;

pub const DEFAULT_HISTOGRAM_THRESHOLD: f64 = 29.0;

/// Joint 3-channel color-histogram comparison.
///
/// The descriptor is a 512-dim L2-normalized histogram (8 bins per channel)
/// of the illustration crop; distances are Bhattacharyya scaled to 0-100.
/// The histogram only sees the color distribution, so two images with the
/// same colors in a different spatial arrangement compare as near-identical.
pub struct HistogramComparator {
    threshold: f64,
}

impl HistogramComparator {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_HISTOGRAM_THRESHOLD,
        }
    }

    /// Override the duplicate distance threshold (0-100 scale).
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Default for HistogramComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageComparator for HistogramComparator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Histogram
    }

    fn descript(&self, image: &mut CardImage) -> Result<Descriptor, SimilarityError> {
        if image.descriptor().is_some() {
            return expect_descriptor(self.kind(), image).map(|descriptor| descriptor.clone());
        }
        let crop = image.illustration()?;
        let histogram = compute_histogram(&crop);
        let descriptor = Descriptor::new(self.kind(), encode(&histogram));
        image.record_descriptor(descriptor.clone());
        Ok(descriptor)
    }

    fn closest_matches<'a>(
        &self,
        reference: &CardImage,
        album: &[&'a CardImage],
        limit: usize,
    ) -> Result<Vec<(f64, &'a CardImage)>, SimilarityError> {
        let reference_hist = decode(expect_descriptor(self.kind(), reference)?, reference)?;
        let mut matches = Vec::with_capacity(album.len());
        for candidate in album {
            let candidate_hist = decode(expect_descriptor(self.kind(), candidate)?, candidate)?;
            matches.push((bhattacharyya(&reference_hist, &candidate_hist), *candidate));
        }
        matches.sort_by(|a, b| a.0.total_cmp(&b.0));
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
            .map(|(distance, _)| *distance < self.threshold)
            .unwrap_or(false))
    }
}

fn compute_histogram(pixels: &RgbImage) -> Vec<f32> {
    let mut histogram = vec![0f32; DESCRIPTOR_LEN];
    for pixel in pixels.pixels() {
        let r = (pixel[0] as u32 / BIN_WIDTH) as usize;
        let g = (pixel[1] as u32 / BIN_WIDTH) as usize;
        let b = (pixel[2] as u32 / BIN_WIDTH) as usize;
        histogram[(r * BINS_PER_CHANNEL + g) * BINS_PER_CHANNEL + b] += 1.0;
    }
    let norm = histogram.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in histogram.iter_mut() {
            *value /= norm;
        }
    }
    histogram
}

/// Bhattacharyya distance between two histograms, scaled to 0-100.
fn bhattacharyya(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().map(|v| *v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|v| *v as f64).sum::<f64>() / n;
    if mean_a <= 0.0 || mean_b <= 0.0 {
        return 100.0;
    }
    let coefficient: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| ((*x as f64) * (*y as f64)).sqrt())
        .sum();
    let squared = (1.0 - coefficient / (mean_a * mean_b * n * n).sqrt()).max(0.0);
    squared.sqrt() * 100.0
}

fn encode(histogram: &[f32]) -> Vec<u8> {
    histogram.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode(descriptor: &Descriptor, image: &CardImage) -> Result<Vec<f32>, SimilarityError> {
    let bytes = descriptor.bytes();
    if bytes.len() != DESCRIPTOR_LEN * 4 {
        return Err(SimilarityError::Malformed {
            kind: StrategyKind::Histogram,
            location: image.location().to_string(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn described(location: &str, pixels: RgbImage) -> CardImage {
        let mut card = CardImage::from_pixels(location, pixels);
        HistogramComparator::new().descript(&mut card).unwrap();
        card
    }

    fn gradient(width: u32, height: u32, seed: u8) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                ((x * 3) % 256) as u8 ^ seed,
                ((y * 5) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let a = described("mem:a", gradient(200, 280, 0));
        let b = described("mem:b", gradient(200, 280, 0));
        let comparator = HistogramComparator::new();
        let matches = comparator.closest_matches(&a, &[&b], 1).unwrap();
        assert!(matches[0].0 < 1e-3);
        assert!(comparator.is_duplicate(&a, &[&b]).unwrap());
    }

    #[test]
    fn distance_is_permutation_invariant() {
        // Same color multiset, different spatial arrangement: 1px vertical
        // stripes vs 1px horizontal stripes.
        let vertical = RgbImage::from_fn(200, 280, |x, _| {
            if x % 2 == 0 { Rgb([220, 30, 30]) } else { Rgb([30, 30, 220]) }
        });
        let horizontal = RgbImage::from_fn(200, 280, |_, y| {
            if y % 2 == 0 { Rgb([220, 30, 30]) } else { Rgb([30, 30, 220]) }
        });
        let a = described("mem:v", vertical);
        let b = described("mem:h", horizontal);
        let matches = HistogramComparator::new()
            .closest_matches(&a, &[&b], 1)
            .unwrap();
        assert!(matches[0].0 < 2.0, "distance was {}", matches[0].0);
    }

    #[test]
    fn different_palettes_are_not_duplicates() {
        let red = described("mem:red", RgbImage::from_pixel(200, 280, Rgb([200, 20, 20])));
        let blue = described("mem:blue", RgbImage::from_pixel(200, 280, Rgb([20, 20, 200])));
        let comparator = HistogramComparator::new();
        assert!(!comparator.is_duplicate(&red, &[&blue]).unwrap());
    }

    #[test]
    fn empty_album_is_never_a_duplicate() {
        let a = described("mem:a", gradient(200, 280, 0));
        assert!(!HistogramComparator::new().is_duplicate(&a, &[]).unwrap());
    }

    #[test]
    fn closest_matches_orders_by_ascending_distance() {
        let reference = described("mem:ref", gradient(200, 280, 0));
        let near = described("mem:near", gradient(200, 280, 1));
        let far = described("mem:far", RgbImage::from_pixel(200, 280, Rgb([255, 255, 255])));
        let matches = HistogramComparator::new()
            .closest_matches(&reference, &[&far, &near], 2)
            .unwrap();
        assert!(matches[0].0 <= matches[1].0);
        assert_eq!(matches[0].1.location(), "mem:near");
    }

    #[test]
    fn foreign_descriptor_kind_is_rejected() {
        let a = described("mem:a", gradient(200, 280, 0));
        let mut other = CardImage::from_pixels("mem:other", gradient(200, 280, 0));
        other.record_descriptor(Descriptor::new(StrategyKind::PerceptualHash, vec![0; 4]));
        let result = HistogramComparator::new().closest_matches(&a, &[&other], 1);
        assert!(matches!(result, Err(SimilarityError::KindMismatch { .. })));
    }
}
