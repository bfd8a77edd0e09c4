//! Rolling window of accepted spoilers.
//!
//! The window owns the `SpoiledRecord` collection and is the historical
//! album for duplicate checks. Only two mutations exist: `accept` (append,
//! reached exclusively through the duplicate engine's admit path) and
//! `evict` (age-out). Eviction runs once per crawl cycle, before any dedup
//! check, so no record expires mid-cycle.

use std::time::Duration;

use anyhow::Result;

use crate::card::CardImage;
use crate::sources::SourceKind;
use crate::store::SpoilerStore;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Metadata attached to an image when it is accepted as novel.
#[derive(Clone, Debug)]
pub struct RecordMeta {
    pub source: SourceKind,
    pub set_code: Option<String>,
    pub page_url: Option<String>,
    /// Epoch seconds of the sighting.
    pub found_at: u64,
}

/// An accepted, non-duplicate spoiler. Lives until it ages out of the
/// window.
#[derive(Clone, Debug)]
pub struct SpoiledRecord {
    pub image: CardImage,
    pub found_at: u64,
    pub source: SourceKind,
    pub set_code: Option<String>,
    pub page_url: Option<String>,
}

pub struct SpoilerWindow {
    records: Vec<SpoiledRecord>,
    window: Duration,
}

impl SpoilerWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            records: Vec::new(),
            window,
        }
    }

    pub fn from_days(days: u64) -> Self {
        Self::new(Duration::from_secs(days * SECONDS_PER_DAY))
    }

    /// Rebuild the window from the record store at startup: everything
    /// newer than `now - window`.
    pub fn rehydrate(store: &mut dyn SpoilerStore, window: Duration, now: u64) -> Result<Self> {
        let cutoff = now.saturating_sub(window.as_secs());
        let records = store
            .records_since(cutoff)?
            .into_iter()
            .map(|stored| stored.into_record())
            .collect();
        Ok(Self { records, window })
    }

    /// Append an accepted record. Reached only through
    /// `DuplicateEngine::admit`.
    pub(crate) fn accept(&mut self, image: CardImage, meta: RecordMeta) {
        self.records.push(SpoiledRecord {
            image,
            found_at: meta.found_at,
            source: meta.source,
            set_code: meta.set_code,
            page_url: meta.page_url,
        });
    }

    /// Drop every record older than the window.
    pub fn evict(&mut self, now: u64) {
        let window_secs = self.window.as_secs();
        self.records
            .retain(|record| now.saturating_sub(record.found_at) <= window_secs);
    }

    /// Current records' images as a read-only comparison set.
    pub fn as_album(&self) -> Vec<&CardImage> {
        self.records.iter().map(|record| &record.image).collect()
    }

    pub fn latest(&self) -> Option<&SpoiledRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Descriptor, StrategyKind};
    use crate::dedup::{Admission, DuplicateEngine};
    use crate::similarity::{HistogramComparator, ImageComparator};
    use crate::store::{InMemorySpoilerStore, SpoilerStore};
    use image::{Rgb, RgbImage};

    fn described(location: &str) -> CardImage {
        let pixels = RgbImage::from_fn(200, 280, |x, y| {
            Rgb([((x * 3) % 256) as u8, ((y * 5) % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut card = CardImage::from_pixels(location, pixels);
        HistogramComparator::new().descript(&mut card).unwrap();
        card
    }

    fn meta(found_at: u64) -> RecordMeta {
        RecordMeta {
            source: SourceKind::PrimaryFeed,
            set_code: Some("abc".to_string()),
            page_url: None,
            found_at,
        }
    }

    #[test]
    fn evict_drops_records_older_than_the_window() {
        let day = SECONDS_PER_DAY;
        let now = 100 * day;
        let mut window = SpoilerWindow::from_days(7);
        window.accept(described("mem:old"), meta(now - 8 * day));
        window.accept(described("mem:fresh"), meta(now - 6 * day));

        window.evict(now);

        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().unwrap().image.location(), "mem:fresh");
    }

    #[test]
    fn evicted_duplicate_is_accepted_as_novel_again() {
        let day = SECONDS_PER_DAY;
        let now = 100 * day;
        let engine = DuplicateEngine::new(HistogramComparator::new());
        let mut window = SpoilerWindow::from_days(7);
        engine
            .admit(described("mem:card"), &mut window, meta(now - 8 * day))
            .unwrap();

        // Next cycle: eviction runs before the dedup check.
        window.evict(now);
        let admission = engine
            .admit(described("mem:card-reprint"), &mut window, meta(now))
            .unwrap();

        assert_eq!(admission, Admission::Accepted);
        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().unwrap().image.location(), "mem:card-reprint");
    }

    #[test]
    fn records_at_exactly_the_window_edge_survive() {
        let day = SECONDS_PER_DAY;
        let now = 100 * day;
        let mut window = SpoilerWindow::from_days(7);
        window.accept(described("mem:edge"), meta(now - 7 * day));
        window.evict(now);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn rehydrate_restores_only_in_window_records() {
        let day = SECONDS_PER_DAY;
        let now = 100 * day;
        let mut store = InMemorySpoilerStore::new();

        let mut staging = SpoilerWindow::from_days(30);
        staging.accept(described("mem:old"), meta(now - 20 * day));
        staging.accept(described("mem:fresh"), meta(now - 2 * day));
        for record in [&staging.records[0], &staging.records[1]] {
            store.append(record).unwrap();
        }

        let window =
            SpoilerWindow::rehydrate(&mut store, Duration::from_secs(7 * day), now).unwrap();
        assert_eq!(window.len(), 1);
        let record = window.latest().unwrap();
        assert_eq!(record.image.location(), "mem:fresh");
        assert_eq!(record.source, SourceKind::PrimaryFeed);
        assert_eq!(record.set_code.as_deref(), Some("abc"));
        assert_eq!(
            record.image.descriptor().map(Descriptor::kind),
            Some(StrategyKind::Histogram)
        );
    }

    #[test]
    fn rehydrated_album_is_usable_for_dedup_without_pixels() {
        let day = SECONDS_PER_DAY;
        let now = 100 * day;
        let mut store = InMemorySpoilerStore::new();
        let mut staging = SpoilerWindow::from_days(7);
        staging.accept(described("mem:card"), meta(now - day));
        store.append(staging.latest().unwrap()).unwrap();

        let mut window =
            SpoilerWindow::rehydrate(&mut store, Duration::from_secs(7 * day), now).unwrap();
        assert!(window.latest().unwrap().image.pixels_if_loaded().is_none());

        let engine = DuplicateEngine::new(HistogramComparator::new());
        let admission = engine
            .admit(described("mem:card-again"), &mut window, meta(now))
            .unwrap();
        assert_eq!(admission, Admission::Duplicate);
    }
}
