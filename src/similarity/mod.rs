//! Image similarity strategies.
//!
//! Three interchangeable algorithms sit behind one `ImageComparator` trait:
//! local-feature keypoint matching, joint color-histogram comparison, and
//! perceptual hashing. A strategy is selected once, at construction time;
//! nothing downstream branches on which one is active. Feature matching is
//! robust to crops and lighting but pays O(keypoints) per comparison, while
//! histogram and hash descriptors are fixed-size and cheap to scan against
//! large historical windows.

mod features;
mod histogram;
mod phash;

pub use features::{FeatureComparator, DEFAULT_FEATURE_THRESHOLD, DEFAULT_LOWE_RATIO};
pub use histogram::{HistogramComparator, DEFAULT_HISTOGRAM_THRESHOLD};
pub use phash::{HashComparator, DEFAULT_HASH_THRESHOLD};

use thiserror::Error;

use crate::card::{CardImage, DecodeError, Descriptor, StrategyKind};
use crate::config::StrategySettings;

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("image {0} has no descriptor")]
    MissingDescriptor(String),

    #[error("descriptor kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: StrategyKind,
        found: StrategyKind,
    },

    #[error("malformed {kind} descriptor for {location}")]
    Malformed {
        kind: StrategyKind,
        location: String,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A similarity strategy: descriptor computation, closest-match search,
/// duplicate test and batch dedup.
pub trait ImageComparator {
    fn kind(&self) -> StrategyKind;

    /// Compute the descriptor for this strategy and record it on the
    /// image. A descriptor this strategy already computed is returned
    /// as-is; one computed by a different strategy is a kind mismatch.
    fn descript(&self, image: &mut CardImage) -> Result<Descriptor, SimilarityError>;

    /// Closest album members, most similar first, truncated to `limit`.
    /// For the distance-based strategies the score is a distance
    /// (ascending); for feature matching it is a good-match count
    /// (descending).
    fn closest_matches<'a>(
        &self,
        reference: &CardImage,
        album: &[&'a CardImage],
        limit: usize,
    ) -> Result<Vec<(f64, &'a CardImage)>, SimilarityError>;

    /// True iff the best album match clears the strategy's duplicate
    /// threshold. An empty album is never a duplicate.
    fn is_duplicate(
        &self,
        reference: &CardImage,
        album: &[&CardImage],
    ) -> Result<bool, SimilarityError>;

    /// Drop in-album duplicates, keeping the first-seen representative of
    /// each cluster. Each member is compared against the kept set only, so
    /// it never matches itself, and reprocessing the output is a no-op.
    fn remove_duplicates<'a>(
        &self,
        album: &[&'a CardImage],
    ) -> Result<Vec<&'a CardImage>, SimilarityError> {
        let mut unique: Vec<&'a CardImage> = Vec::with_capacity(album.len());
        for &image in album {
            if unique.is_empty() || !self.is_duplicate(image, &unique)? {
                unique.push(image);
            }
        }
        Ok(unique)
    }
}

impl<T: ImageComparator + ?Sized> ImageComparator for Box<T> {
    fn kind(&self) -> StrategyKind {
        (**self).kind()
    }

    fn descript(&self, image: &mut CardImage) -> Result<Descriptor, SimilarityError> {
        (**self).descript(image)
    }

    fn closest_matches<'a>(
        &self,
        reference: &CardImage,
        album: &[&'a CardImage],
        limit: usize,
    ) -> Result<Vec<(f64, &'a CardImage)>, SimilarityError> {
        (**self).closest_matches(reference, album, limit)
    }

    fn is_duplicate(
        &self,
        reference: &CardImage,
        album: &[&CardImage],
    ) -> Result<bool, SimilarityError> {
        (**self).is_duplicate(reference, album)
    }

    fn remove_duplicates<'a>(
        &self,
        album: &[&'a CardImage],
    ) -> Result<Vec<&'a CardImage>, SimilarityError> {
        (**self).remove_duplicates(album)
    }
}

/// Build the configured comparator.
pub fn select_comparator(settings: &StrategySettings) -> Box<dyn ImageComparator> {
    match settings.method {
        StrategyKind::Features => Box::new(
            FeatureComparator::new()
                .with_lowe_ratio(settings.lowe_ratio)
                .with_threshold(settings.feature_threshold),
        ),
        StrategyKind::Histogram => {
            Box::new(HistogramComparator::new().with_threshold(settings.histogram_threshold))
        }
        StrategyKind::PerceptualHash => {
            Box::new(HashComparator::new().with_threshold(settings.hash_threshold))
        }
    }
}

/// Fetch an image's descriptor, insisting it was produced by `kind`.
pub(crate) fn expect_descriptor<'a>(
    kind: StrategyKind,
    image: &'a CardImage,
) -> Result<&'a Descriptor, SimilarityError> {
    let descriptor = image
        .descriptor()
        .ok_or_else(|| SimilarityError::MissingDescriptor(image.location().to_string()))?;
    if descriptor.kind() != kind {
        return Err(SimilarityError::KindMismatch {
            expected: kind,
            found: descriptor.kind(),
        });
    }
    Ok(descriptor)
}
