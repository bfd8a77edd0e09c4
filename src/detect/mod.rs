//! Card detection.
//!
//! The opaque vision scorer is an injected capability (`VisionScorer`) so a
//! real model can be swapped for a stub in tests without touching the crawl
//! or dedup logic. `CardDetector` owns all pre/post-processing around it:
//! down-scaling, confidence filtering, non-max suppression, aspect gating
//! and remapping back to source coordinates.

mod adapter;
mod backends;
mod nms;
mod scorer;

pub use adapter::{
    CardDetector, DetectError, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_RATIO_TOLERANCE,
    DEFAULT_SCALE_RATIO,
};
pub use backends::StubScorer;
#[cfg(feature = "backend-tract")]
pub use backends::TractScorer;
pub use nms::non_max_suppression;
pub use scorer::{CellScore, ScorerError, VisionScorer};
