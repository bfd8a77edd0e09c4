use image::RgbImage;

use crate::detect::scorer::{CellScore, ScorerError, VisionScorer};

/// Stub scorer for tests and model-less runs. Returns a canned set of
/// cells for every image it is given.
pub struct StubScorer {
    cells: Vec<CellScore>,
}

impl StubScorer {
    /// A scorer that never detects anything.
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }

    pub fn with_cells(cells: Vec<CellScore>) -> Self {
        Self { cells }
    }
}

impl Default for StubScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl VisionScorer for StubScorer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn score(&mut self, _pixels: &RgbImage) -> Result<Vec<CellScore>, ScorerError> {
        Ok(self.cells.clone())
    }
}
