//! Duplicate screening.
//!
//! Two scopes, always in this order: in-batch dedup over one source image's
//! detections (small album, cheap), then a historical check against the
//! spoiler window. The historical check and the window append run inside a
//! single `admit` call, so two images polled in the same cycle cannot both
//! slip past the check and both be accepted as the first sighting of the
//! same card. An image rejected at either stage never reaches the store or
//! the notification sink.

use crate::card::CardImage;
use crate::similarity::{ImageComparator, SimilarityError};
use crate::window::{RecordMeta, SpoilerWindow};

/// Outcome of a historical dedup check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Novel: appended to the window; read it back via `SpoilerWindow::latest`.
    Accepted,
    /// Near-duplicate of a windowed record; discarded.
    Duplicate,
}

pub struct DuplicateEngine<C> {
    comparator: C,
}

impl<C: ImageComparator> DuplicateEngine<C> {
    pub fn new(comparator: C) -> Self {
        Self { comparator }
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Compute and record the descriptor for a freshly extracted image.
    pub fn describe(&self, image: &mut CardImage) -> Result<(), SimilarityError> {
        self.comparator.descript(image).map(|_| ())
    }

    /// In-batch dedup: the first sighting of each duplicate cluster
    /// survives. Idempotent.
    pub fn filter_batch(&self, batch: Vec<CardImage>) -> Result<Vec<CardImage>, SimilarityError> {
        let mut kept_indices: Vec<usize> = Vec::new();
        for index in 0..batch.len() {
            let album: Vec<&CardImage> = kept_indices.iter().map(|&i| &batch[i]).collect();
            if album.is_empty() || !self.comparator.is_duplicate(&batch[index], &album)? {
                kept_indices.push(index);
            }
        }
        if kept_indices.len() == batch.len() {
            return Ok(batch);
        }
        Ok(batch
            .into_iter()
            .enumerate()
            .filter(|(index, _)| kept_indices.contains(index))
            .map(|(_, image)| image)
            .collect())
    }

    /// Historical check and accept, atomic as a pair.
    ///
    /// On accept the image's confidence percentage is stamped from the best
    /// match score against the window before the record is appended.
    pub fn admit(
        &self,
        mut image: CardImage,
        window: &mut SpoilerWindow,
        meta: RecordMeta,
    ) -> Result<Admission, SimilarityError> {
        {
            let album = window.as_album();
            if !album.is_empty() {
                if self.comparator.is_duplicate(&image, &album)? {
                    return Ok(Admission::Duplicate);
                }
                if let Some((score, _)) = self.comparator.closest_matches(&image, &album, 1)?.first()
                {
                    image.set_confidence(score.round().clamp(0.0, 100.0) as u8);
                }
            }
        }
        window.accept(image, meta);
        Ok(Admission::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::HistogramComparator;
    use crate::sources::SourceKind;
    use image::{Rgb, RgbImage};

    // Two visually distinct illustrations: a broad gradient and a
    // two-tone split have very different color distributions.
    fn artwork(seed: u32) -> RgbImage {
        match seed {
            0 => RgbImage::from_fn(200, 280, |x, y| {
                Rgb([((x * 3) % 256) as u8, ((y * 5) % 256) as u8, ((x + y) % 256) as u8])
            }),
            _ => RgbImage::from_fn(200, 280, |x, _| {
                if x < 100 {
                    Rgb([210, 40, 40])
                } else {
                    Rgb([40, 40, 210])
                }
            }),
        }
    }

    fn described(location: &str, seed: u32) -> CardImage {
        let mut card = CardImage::from_pixels(location, artwork(seed));
        HistogramComparator::new().descript(&mut card).unwrap();
        card
    }

    fn meta(found_at: u64) -> RecordMeta {
        RecordMeta {
            source: SourceKind::ForumFeed,
            set_code: None,
            page_url: None,
            found_at,
        }
    }

    #[test]
    fn batch_with_jittered_duplicate_keeps_two_cards() {
        // A and A' share the same illustration; B is distinct.
        let batch = vec![
            described("mem:a", 0),
            described("mem:a-jitter", 0),
            described("mem:b", 1),
        ];
        let engine = DuplicateEngine::new(HistogramComparator::new());
        let unique = engine.filter_batch(batch).unwrap();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].location(), "mem:a");
        assert_eq!(unique[1].location(), "mem:b");
    }

    #[test]
    fn filter_batch_is_idempotent() {
        let batch = vec![
            described("mem:a", 0),
            described("mem:a-jitter", 0),
            described("mem:b", 1),
        ];
        let engine = DuplicateEngine::new(HistogramComparator::new());
        let once = engine.filter_batch(batch).unwrap();
        let locations: Vec<String> = once.iter().map(|i| i.location().to_string()).collect();
        let twice = engine.filter_batch(once).unwrap();
        let relocations: Vec<String> = twice.iter().map(|i| i.location().to_string()).collect();
        assert_eq!(locations, relocations);
    }

    #[test]
    fn empty_window_accepts_all_batch_survivors() {
        let engine = DuplicateEngine::new(HistogramComparator::new());
        let mut window = SpoilerWindow::from_days(7);
        for (location, seed) in [("mem:a", 0), ("mem:b", 1)] {
            let admission = engine
                .admit(described(location, seed), &mut window, meta(1_000))
                .unwrap();
            assert_eq!(admission, Admission::Accepted);
        }
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn windowed_image_rejects_its_duplicate() {
        let engine = DuplicateEngine::new(HistogramComparator::new());
        let mut window = SpoilerWindow::from_days(7);
        engine
            .admit(described("mem:a", 0), &mut window, meta(1_000))
            .unwrap();
        let admission = engine
            .admit(described("mem:a-again", 0), &mut window, meta(1_001))
            .unwrap();
        assert_eq!(admission, Admission::Duplicate);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn accepted_image_gets_a_confidence_percentage() {
        let engine = DuplicateEngine::new(HistogramComparator::new());
        let mut window = SpoilerWindow::from_days(7);
        engine
            .admit(described("mem:a", 0), &mut window, meta(1_000))
            .unwrap();
        engine
            .admit(described("mem:b", 1), &mut window, meta(1_001))
            .unwrap();
        let latest = window.latest().unwrap();
        assert_eq!(latest.image.location(), "mem:b");
        assert!(latest.image.confidence().is_some());
    }
}
