//! Crawl cycle orchestration.
//!
//! Single-threaded, cooperative: one cycle runs fetch -> detect -> dedup ->
//! record -> notify to completion, then the crawler sleeps out the
//! remainder of the configured minimum interval (back-to-back when a cycle
//! overran). Errors are isolated per unit of work: a failed image skips
//! that image, a failed source skips that source for the cycle, and
//! nothing here is fatal to the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};

use crate::card::CardImage;
use crate::dedup::{Admission, DuplicateEngine};
use crate::detect::{CardDetector, VisionScorer};
use crate::notify::{encode_jpeg, NotificationSink, Photo};
use crate::now_s;
use crate::similarity::ImageComparator;
use crate::sources::{ImageRef, SourceKind, SpoilerCandidate, SpoilerSource};
use crate::store::SpoilerStore;
use crate::window::{RecordMeta, SpoiledRecord, SpoilerWindow};

/// How long to sleep between stop-flag checks while idling.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Minimum time between cycle starts.
    pub interval: Duration,
    pub confidence_threshold: f32,
    pub ratio_tolerance: f32,
}

pub struct Crawler<C, S> {
    sources: Vec<Box<dyn SpoilerSource>>,
    detector: CardDetector<S>,
    engine: DuplicateEngine<C>,
    window: SpoilerWindow,
    store: Box<dyn SpoilerStore>,
    sink: Box<dyn NotificationSink>,
    settings: CrawlSettings,
}

impl<C: ImageComparator, S: VisionScorer> Crawler<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sources: Vec<Box<dyn SpoilerSource>>,
        detector: CardDetector<S>,
        engine: DuplicateEngine<C>,
        window: SpoilerWindow,
        store: Box<dyn SpoilerStore>,
        sink: Box<dyn NotificationSink>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            sources,
            detector,
            engine,
            window,
            store,
            sink,
            settings,
        }
    }

    pub fn window(&self) -> &SpoilerWindow {
        &self.window
    }

    /// Run cycles until the stop flag is set. The flag is checked between
    /// cycles and while sleeping, never mid-cycle.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(
            "crawler running: {} source(s), interval {}s",
            self.sources.len(),
            self.settings.interval.as_secs()
        );
        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            if let Err(e) = self.cycle() {
                error!("crawl cycle failed: {e:#}");
            }
            let elapsed = started.elapsed();
            if let Some(remaining) = self.settings.interval.checked_sub(elapsed) {
                let deadline = Instant::now() + remaining;
                while !stop.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    std::thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
                }
            }
        }
        info!("crawler stopped");
    }

    /// Run exactly one cycle.
    pub fn run_once(&mut self) -> Result<()> {
        self.cycle()
    }

    fn cycle(&mut self) -> Result<()> {
        let now = now_s()?;

        // Age out expired records first so the historical album stays
        // consistent for the whole cycle.
        self.window.evict(now);
        debug!("window holds {} record(s) after eviction", self.window.len());

        let mut gathered: Vec<(SourceKind, Vec<SpoilerCandidate>)> = Vec::new();
        for source in &mut self.sources {
            match source.poll() {
                Ok(candidates) => {
                    debug!("{}: {} candidate(s)", source.kind(), candidates.len());
                    gathered.push((source.kind(), candidates));
                }
                Err(e) => warn!("{} unavailable this cycle: {e}", source.kind()),
            }
        }

        for (kind, candidates) in gathered {
            for candidate in candidates {
                if let Err(e) = self.process_candidate(kind, candidate, now) {
                    warn!("skipping candidate from {kind}: {e:#}");
                }
            }
        }
        Ok(())
    }

    fn process_candidate(
        &mut self,
        kind: SourceKind,
        candidate: SpoilerCandidate,
        now: u64,
    ) -> Result<()> {
        let batch = if candidate.cluttered {
            self.extract_cards(&candidate)?
        } else {
            vec![direct_card(&candidate)?]
        };

        let mut described = Vec::new();
        for mut image in batch {
            match self.engine.describe(&mut image) {
                Ok(()) => described.push(image),
                Err(e) => warn!("skipping undescribable image {}: {e:#}", image.location()),
            }
        }

        let total = described.len();
        let unique = self.engine.filter_batch(described)?;
        if unique.len() < total {
            info!(
                "{kind}: in-batch dedup kept {} of {} card(s)",
                unique.len(),
                total
            );
        }

        for image in unique {
            let meta = RecordMeta {
                source: kind,
                set_code: candidate.set_code.clone(),
                page_url: candidate.page_url.clone(),
                found_at: now,
            };
            match self.engine.admit(image, &mut self.window, meta)? {
                Admission::Duplicate => {
                    debug!("{kind}: duplicate of a windowed spoiler ignored");
                }
                Admission::Accepted => {
                    if let Some(record) = self.window.latest() {
                        info!(
                            "{kind}: new spoiler accepted from {}",
                            record.image.location()
                        );
                        if let Err(e) = self.store.append(record) {
                            error!("failed to persist spoiler: {e:#}");
                        }
                        let caption = caption_for(record);
                        let delivery = match record.image.pixels_if_loaded() {
                            Some(pixels) => encode_jpeg(pixels)
                                .and_then(|bytes| self.sink.send_photo(Photo::Bytes(&bytes), &caption)),
                            None => self
                                .sink
                                .send_photo(Photo::Location(record.image.location()), &caption),
                        };
                        if let Err(e) = delivery {
                            error!("notification failed: {e:#}");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// A cluttered photo may show several cards; run the detector and
    /// build one image per extracted crop.
    fn extract_cards(&mut self, candidate: &SpoilerCandidate) -> Result<Vec<CardImage>> {
        let mut parent = match &candidate.image {
            ImageRef::Url(url) => CardImage::from_location(url.clone()),
            ImageRef::Bytes(bytes) => {
                let location = candidate
                    .page_url
                    .clone()
                    .unwrap_or_else(|| "inline".to_string());
                CardImage::from_bytes(location, bytes)?
            }
        };
        let crops = self.detector.detect(
            &mut parent,
            self.settings.confidence_threshold,
            self.settings.ratio_tolerance,
        )?;
        let location = parent.location().to_string();
        Ok(crops
            .into_iter()
            .map(|(pixels, _)| CardImage::from_pixels(location.clone(), pixels))
            .collect())
    }
}

fn direct_card(candidate: &SpoilerCandidate) -> Result<CardImage> {
    match &candidate.image {
        ImageRef::Url(url) => Ok(CardImage::from_location(url.clone())),
        ImageRef::Bytes(bytes) => {
            let location = candidate
                .page_url
                .clone()
                .unwrap_or_else(|| "inline".to_string());
            Ok(CardImage::from_bytes(location, bytes)?)
        }
    }
}

fn caption_for(record: &SpoiledRecord) -> String {
    let mut caption = String::from("New spoiler");
    if let Some(set_code) = &record.set_code {
        caption.push_str(&format!(" from [{}]", set_code.to_uppercase()));
    }
    caption.push('!');
    if let Some(page_url) = &record.page_url {
        caption.push_str(&format!("\nSource: <a href=\"{page_url}\">{}</a>", record.source));
    } else {
        caption.push_str(&format!("\nSource: {}", record.source));
    }
    if let Some(percent) = record.image.confidence() {
        caption.push_str(&format!("\n<i>confidence = {percent}%</i>"));
    }
    caption
}
