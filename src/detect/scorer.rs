use image::RgbImage;
use thiserror::Error;

/// Raw per-cell score emitted by a vision scorer.
///
/// Geometry is normalized to [0, 1] relative to the scored image: `cx`/`cy`
/// locate the box center, `w`/`h` its size. `class_scores` holds one score
/// per known class; the adapter takes the argmax.
#[derive(Clone, Debug)]
pub struct CellScore {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub class_scores: Vec<f32>,
}

/// The scorer failed. Detection is aborted for the one image being scored;
/// the crawl cycle continues with the rest of the batch.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("model output malformed: {0}")]
    Malformed(String),
}

/// Opaque vision scorer.
///
/// Implementations receive a down-scaled RGB image and return per-cell
/// class-score vectors. They own their tensor layout and normalization; the
/// adapter owns everything before and after the call.
pub trait VisionScorer: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Score one image.
    fn score(&mut self, pixels: &RgbImage) -> Result<Vec<CellScore>, ScorerError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), ScorerError> {
        Ok(())
    }
}

impl<T: VisionScorer + ?Sized> VisionScorer for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn score(&mut self, pixels: &RgbImage) -> Result<Vec<CellScore>, ScorerError> {
        (**self).score(pixels)
    }

    fn warm_up(&mut self) -> Result<(), ScorerError> {
        (**self).warm_up()
    }
}
