#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::scorer::{CellScore, ScorerError, VisionScorer};

/// Tract-based scorer for ONNX detection models.
///
/// The model is loaded from a local file and fed a fixed-size normalized
/// NCHW tensor. The output is expected to be YOLO-style rows of
/// `[cx, cy, w, h, objectness, class scores...]` with geometry normalized
/// to [0, 1]. No network I/O happens after model loading.
pub struct TractScorer {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
}

impl TractScorer {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, pixels: &RgbImage) -> Tensor {
        let resized = imageops::resize(pixels, self.width, self.height, FilterType::Triangle);
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }
}

impl VisionScorer for TractScorer {
    fn name(&self) -> &'static str {
        "tract-onnx"
    }

    fn score(&mut self, pixels: &RgbImage) -> Result<Vec<CellScore>, ScorerError> {
        let input = self.build_input(pixels);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| ScorerError::Inference(e.to_string()))?;

        let output = outputs
            .first()
            .ok_or_else(|| ScorerError::Malformed("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| ScorerError::Malformed(e.to_string()))?;

        let stride = *view
            .shape()
            .last()
            .ok_or_else(|| ScorerError::Malformed("output tensor has no shape".to_string()))?;
        if stride < 6 {
            return Err(ScorerError::Malformed(format!(
                "expected rows of at least 6 values, found {stride}"
            )));
        }

        let flat: Vec<f32> = view.iter().copied().collect();
        let cells = flat
            .chunks_exact(stride)
            .map(|row| CellScore {
                cx: row[0],
                cy: row[1],
                w: row[2],
                h: row[3],
                class_scores: row[5..].to_vec(),
            })
            .collect();
        Ok(cells)
    }
}
