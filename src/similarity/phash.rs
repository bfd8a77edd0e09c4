use image::{DynamicImage, RgbImage};
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};

use crate::card::{CardImage, Descriptor, StrategyKind};
use crate::similarity::{expect_descriptor, ImageComparator, SimilarityError};

const DEFAULT_HASH_SIZE: u32 = 16;

pub const DEFAULT_HASH_THRESHOLD: u32 = 30;

/// Perceptual-hash comparison.
///
/// The descriptor is the base64 form of a 16x16 DCT hash of the
/// illustration crop; distances are Hamming distances between hashes.
pub struct HashComparator {
    hasher: Hasher,
    threshold: u32,
}

impl HashComparator {
    pub fn new() -> Self {
        Self::with_hash_size(DEFAULT_HASH_SIZE)
    }

    pub fn with_hash_size(hash_size: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_size(hash_size, hash_size)
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .to_hasher();
        Self {
            hasher,
            threshold: DEFAULT_HASH_THRESHOLD,
        }
    }

    /// Override the duplicate Hamming-distance threshold.
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    fn hash_pixels(&self, crop: RgbImage) -> ImageHash {
        self.hasher.hash_image(&DynamicImage::ImageRgb8(crop))
    }
}

impl Default for HashComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageComparator for HashComparator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PerceptualHash
    }

    fn descript(&self, image: &mut CardImage) -> Result<Descriptor, SimilarityError> {
        if image.descriptor().is_some() {
            return expect_descriptor(self.kind(), image).map(|descriptor| descriptor.clone());
        }
        let crop = image.illustration()?;
        let hash = self.hash_pixels(crop);
        let descriptor = Descriptor::new(self.kind(), hash.to_base64().into_bytes());
        image.record_descriptor(descriptor.clone());
        Ok(descriptor)
    }

    fn closest_matches<'a>(
        &self,
        reference: &CardImage,
        album: &[&'a CardImage],
        limit: usize,
    ) -> Result<Vec<(f64, &'a CardImage)>, SimilarityError> {
        let reference_hash = decode(expect_descriptor(self.kind(), reference)?, reference)?;
        let mut matches = Vec::with_capacity(album.len());
        for candidate in album {
            let candidate_hash = decode(expect_descriptor(self.kind(), candidate)?, candidate)?;
            matches.push((reference_hash.dist(&candidate_hash) as f64, *candidate));
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
            .map(|(distance, _)| *distance < self.threshold as f64)
            .unwrap_or(false))
    }
}

fn decode(descriptor: &Descriptor, image: &CardImage) -> Result<ImageHash, SimilarityError> {
    let malformed = || SimilarityError::Malformed {
        kind: StrategyKind::PerceptualHash,
        location: image.location().to_string(),
    };
    let encoded = std::str::from_utf8(descriptor.bytes()).map_err(|_| malformed())?;
    ImageHash::from_base64(encoded).map_err(|_| malformed())
}
