//! Card image model.
//!
//! A `CardImage` is identified by its location (a URL or an opaque handle)
//! and lazily materializes its pixel buffer from that location when needed.
//! Once computed, a descriptor is immutable and tagged with the strategy
//! that produced it, so descriptors from different algorithms are never
//! compared against each other.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use image::{imageops, RgbImage};
use thiserror::Error;
use url::Url;

/// Relative illustration box of a card face: (center x, center y, width,
/// height) as fractions of the full card image. Anchoring comparisons on
/// the artwork region keeps frame text and collector info out of the
/// descriptors.
const ILLUSTRATION_BOX: (f64, f64, f64, f64) = (0.502232, 0.332265, 0.855655, 0.448718);

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// A card image could not be fetched or decoded. The caller skips the one
/// image and continues the batch.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("fetch failed for {location}: {reason}")]
    Fetch { location: String, reason: String },

    #[error("image decode failed for {location}")]
    Decode {
        location: String,
        #[source]
        source: image::ImageError,
    },

    #[error("no pixel data available for {location}")]
    NoPixels { location: String },
}

/// Identity of the similarity strategy that produced a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    Features,
    Histogram,
    PerceptualHash,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Features => "features",
            StrategyKind::Histogram => "histogram",
            StrategyKind::PerceptualHash => "phash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "features" => Some(StrategyKind::Features),
            "histogram" => Some(StrategyKind::Histogram),
            "phash" => Some(StrategyKind::PerceptualHash),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact, strategy-specific encoding of an image. The byte layout is
/// owned by the strategy named in `kind`.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    kind: StrategyKind,
    bytes: Vec<u8>,
}

impl Descriptor {
    pub fn new(kind: StrategyKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A single card image flowing through the harvest pipeline.
#[derive(Clone, Debug)]
pub struct CardImage {
    location: String,
    pixels: Option<RgbImage>,
    descriptor: Option<Descriptor>,
    confidence: Option<u8>,
}

impl CardImage {
    /// Image known only by location; pixels are fetched on first use.
    pub fn from_location(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            pixels: None,
            descriptor: None,
            confidence: None,
        }
    }

    /// Image with an already-materialized pixel buffer (e.g. a detector
    /// crop). The location records where the parent image came from.
    pub fn from_pixels(location: impl Into<String>, pixels: RgbImage) -> Self {
        Self {
            location: location.into(),
            pixels: Some(pixels),
            descriptor: None,
            confidence: None,
        }
    }

    /// Decode an in-memory encoded image (JPEG/PNG).
    pub fn from_bytes(location: impl Into<String>, bytes: &[u8]) -> Result<Self, DecodeError> {
        let location = location.into();
        let decoded = image::load_from_memory(bytes).map_err(|source| DecodeError::Decode {
            location: location.clone(),
            source,
        })?;
        Ok(Self::from_pixels(location, decoded.to_rgb8()))
    }

    /// Attach a previously persisted descriptor (store rehydration).
    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    pub fn confidence(&self) -> Option<u8> {
        self.confidence
    }

    /// Stamped once, when a match decision has been made for this image.
    pub(crate) fn set_confidence(&mut self, percent: u8) {
        self.confidence = Some(percent.min(100));
    }

    /// Record a freshly computed descriptor. A descriptor already present
    /// is kept; strategies reject kind mismatches before calling this.
    pub(crate) fn record_descriptor(&mut self, descriptor: Descriptor) {
        if self.descriptor.is_none() {
            self.descriptor = Some(descriptor);
        }
    }

    /// Pixel buffer, fetching and decoding from the location if absent.
    pub fn pixels(&mut self) -> Result<&RgbImage, DecodeError> {
        if self.pixels.is_none() {
            let bytes = fetch_bytes(&self.location)?;
            let decoded =
                image::load_from_memory(&bytes).map_err(|source| DecodeError::Decode {
                    location: self.location.clone(),
                    source,
                })?;
            self.pixels = Some(decoded.to_rgb8());
        }
        self.pixels.as_ref().ok_or_else(|| DecodeError::NoPixels {
            location: self.location.clone(),
        })
    }

    pub fn pixels_if_loaded(&self) -> Option<&RgbImage> {
        self.pixels.as_ref()
    }

    /// Artwork-only crop of the card, located by `ILLUSTRATION_BOX`.
    /// Falls back to the full image when the card is too small to crop.
    pub fn illustration(&mut self) -> Result<RgbImage, DecodeError> {
        let pixels = self.pixels()?;
        let (width, height) = pixels.dimensions();
        let (cx, cy, bw, bh) = ILLUSTRATION_BOX;
        let x1 = ((cx * width as f64) - (bw * width as f64) / 2.0).max(0.0) as u32;
        let y1 = ((cy * height as f64) - (bh * height as f64) / 2.0).max(0.0) as u32;
        let x2 = (((cx * width as f64) + (bw * width as f64) / 2.0) as u32).min(width);
        let y2 = (((cy * height as f64) + (bh * height as f64) / 2.0) as u32).min(height);
        if x2 <= x1 || y2 <= y1 {
            return Ok(pixels.clone());
        }
        Ok(imageops::crop_imm(pixels, x1, y1, x2 - x1, y2 - y1).to_image())
    }
}

fn fetch_bytes(location: &str) -> Result<Vec<u8>, DecodeError> {
    let remote = Url::parse(location)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false);
    if !remote {
        return Err(DecodeError::NoPixels {
            location: location.to_string(),
        });
    }

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(FETCH_TIMEOUT)
        .timeout_read(FETCH_TIMEOUT)
        .build();
    let response = agent
        .get(location)
        .call()
        .map_err(|e| DecodeError::Fetch {
            location: location.to_string(),
            reason: e.to_string(),
        })?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_IMAGE_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| DecodeError::Fetch {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
    if bytes.is_empty() {
        return Err(DecodeError::Fetch {
            location: location.to_string(),
            reason: "empty response body".to_string(),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn illustration_crops_the_artwork_region() {
        let mut card = CardImage::from_pixels("mem:card", solid(200, 280, [10, 20, 30]));
        let crop = card.illustration().unwrap();
        // Roughly 85% of the width, 45% of the height, centered on the art.
        assert_eq!(crop.dimensions(), (172, 125));
    }

    #[test]
    fn illustration_of_tiny_image_falls_back_to_full_image() {
        let mut card = CardImage::from_pixels("mem:tiny", solid(1, 1, [0, 0, 0]));
        let crop = card.illustration().unwrap();
        assert_eq!(crop.dimensions(), (1, 1));
    }

    #[test]
    fn descriptor_is_recorded_once() {
        let mut card = CardImage::from_pixels("mem:card", solid(4, 4, [1, 2, 3]));
        card.record_descriptor(Descriptor::new(StrategyKind::Histogram, vec![1]));
        card.record_descriptor(Descriptor::new(StrategyKind::Histogram, vec![2]));
        assert_eq!(card.descriptor().unwrap().bytes(), &[1]);
    }

    #[test]
    fn pixels_for_non_remote_location_is_an_error() {
        let mut card = CardImage::from_location("mem:never-fetched");
        assert!(matches!(
            card.pixels(),
            Err(DecodeError::NoPixels { .. })
        ));
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(matches!(
            CardImage::from_bytes("mem:bad", b"not an image"),
            Err(DecodeError::Decode { .. })
        ));
    }

    #[test]
    fn confidence_is_clamped_to_percentage() {
        let mut card = CardImage::from_pixels("mem:card", solid(4, 4, [0, 0, 0]));
        card.set_confidence(250);
        assert_eq!(card.confidence(), Some(100));
    }
}
