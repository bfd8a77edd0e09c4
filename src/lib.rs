//! Card spoiler harvester.
//!
//! This crate implements the detection-and-deduplication engine of a
//! trading-card spoiler bot: it continuously pulls candidate images from
//! several source feeds, extracts individual cards from cluttered
//! photographs with an object detector, and decides whether each card is a
//! novel spoiler or a near-duplicate of something already seen.
//!
//! # Architecture
//!
//! - `geometry`: detection-space boxes back to source pixel coordinates
//! - `detect`: the opaque vision scorer (injected capability) plus all
//!   pre/post-processing around it
//! - `similarity`: three interchangeable descriptor strategies behind one
//!   `ImageComparator` trait
//! - `dedup`: in-batch and historical duplicate screening; the historical
//!   check-then-accept pair is atomic
//! - `window`: the rolling, age-evicted cache of accepted spoilers
//! - `sources` / `store` / `notify`: the feed, persistence and delivery
//!   collaborators
//! - `crawler`: the self-timed, cooperatively-stopped crawl loop
//!
//! The daemon binary is `spoilerd`.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

pub mod card;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod detect;
pub mod geometry;
pub mod notify;
pub mod similarity;
pub mod sources;
pub mod store;
pub mod window;

pub use card::{CardImage, DecodeError, Descriptor, StrategyKind};
pub use config::{
    DetectorSettings, HarvesterConfig, NotifySettings, SourceSettings, StrategySettings,
};
pub use crawler::{CrawlSettings, Crawler};
pub use dedup::{Admission, DuplicateEngine};
pub use detect::{
    non_max_suppression, CardDetector, CellScore, DetectError, ScorerError, StubScorer,
    VisionScorer,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractScorer;
pub use geometry::{remap_box, DetectionBox, PixelRect};
pub use notify::{encode_jpeg, BotSink, LogSink, MemorySink, NotificationSink, Photo};
pub use similarity::{
    select_comparator, FeatureComparator, HashComparator, HistogramComparator, ImageComparator,
    SimilarityError,
};
pub use sources::{
    ForumFeed, ImageRef, PrimaryFeed, ScrapeFeed, SourceError, SourceKind, SpoilerCandidate,
    SpoilerSource,
};
pub use store::{InMemorySpoilerStore, SpoilerStore, SqliteSpoilerStore, StoredSpoiler};
pub use window::{RecordMeta, SpoiledRecord, SpoilerWindow};

/// Current time as epoch seconds.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
