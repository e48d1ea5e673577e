//! Enrollment and recognition over an extractor and a shared gallery.

use crate::extractor::{order_regions, ExtractError, FeatureExtractor};
use crate::gallery::{EnrollError, Gallery, LoadSummary, RecognizeError};
use crate::store::{validate_identity, StoreError};
use crate::types::{BoundingBox, DetectionMode, MatchResult, MatchStatus, TemplateHandle};
use image::RgbImage;
use std::sync::Arc;

/// Owns a feature extractor and a handle to the gallery it feeds.
///
/// Every call blocks for the duration of detection and embedding.
pub struct Engine<E> {
    extractor: E,
    gallery: Arc<Gallery>,
}

impl<E: FeatureExtractor> Engine<E> {
    pub fn new(extractor: E, gallery: Arc<Gallery>) -> Self {
        if extractor.mode() == DetectionMode::Fast {
            tracing::warn!("engine configured with fast detection; enrollment and matching use the approximate detector");
        }
        Self { extractor, gallery }
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    pub fn mode(&self) -> DetectionMode {
        self.extractor.mode()
    }

    /// Enroll the single face in `image` under `identity`.
    pub fn enroll(&mut self, image: &RgbImage, identity: &str) -> Result<TemplateHandle, EnrollError> {
        // Checked again by the gallery; failing here skips extraction.
        validate_identity(identity)?;

        let features = self.extractor.extract(image)?;
        tracing::debug!(identity, faces = features.len(), "enroll: faces extracted");

        self.gallery.enroll(identity, features)
    }

    /// Identify the person in `image`.
    ///
    /// "Nobody recognized" is a [`MatchResult`] status, never an error.
    pub fn recognize(&mut self, image: &RgbImage) -> Result<MatchResult, RecognizeError> {
        if self.gallery.ensure_loaded() == 0 {
            return Ok(MatchResult::unmatched(MatchStatus::EmptyGallery));
        }

        let features = self.extractor.extract(image)?;
        tracing::debug!(faces = features.len(), "recognize: faces extracted");

        Ok(self.gallery.match_features(&features))
    }

    /// Fast-mode detection only, for live preview.
    pub fn preview(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ExtractError> {
        let mut regions = self.extractor.detect(image, DetectionMode::Fast)?;
        order_regions(&mut regions);
        Ok(regions)
    }

    /// Rescan the template directory.
    pub fn reload(&self) -> Result<LoadSummary, StoreError> {
        self.gallery.load()
    }
}
