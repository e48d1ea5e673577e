//! Feature extraction: image in, one embedding per detected face out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, DetectionMode, Embedding, FaceFeature};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("detector: {0}")]
    Detector(DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl From<DetectorError> for ExtractError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::InvalidInput(msg) => ExtractError::InvalidInput(msg),
            other => ExtractError::Detector(other),
        }
    }
}

/// Turns a decoded RGB image into face embeddings.
///
/// Implementations are pure functions of their input and configured mode.
pub trait FeatureExtractor {
    /// Mode used by [`extract`](Self::extract).
    fn mode(&self) -> DetectionMode;

    /// Locate faces in `mode`. Zero faces is an empty vector.
    fn detect(&mut self, image: &RgbImage, mode: DetectionMode) -> Result<Vec<BoundingBox>, ExtractError>;

    /// Embed one previously detected region.
    fn embed(&mut self, image: &RgbImage, region: &BoundingBox) -> Result<Embedding, ExtractError>;

    /// Detect in the configured mode and embed every region, largest face first.
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<FaceFeature>, ExtractError> {
        let mode = self.mode();
        let mut regions = self.detect(image, mode)?;
        order_regions(&mut regions);

        regions
            .into_iter()
            .map(|region| {
                let embedding = self.embed(image, &region)?;
                Ok(FaceFeature { region, embedding })
            })
            .collect()
    }
}

/// Order regions by area (largest first), then by detector confidence.
pub fn order_regions(regions: &mut [BoundingBox]) {
    regions.sort_by(|a, b| {
        b.area()
            .partial_cmp(&a.area())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
}

/// SCRFD + ArcFace extractor backed by ONNX Runtime.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    mode: DetectionMode,
}

impl OnnxExtractor {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer, mode: DetectionMode) -> Self {
        Self {
            detector,
            recognizer,
            mode,
        }
    }

    /// Load both models from disk.
    pub fn load(scrfd_path: &str, arcface_path: &str, mode: DetectionMode) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self::new(detector, recognizer, mode))
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn mode(&self) -> DetectionMode {
        self.mode
    }

    fn detect(&mut self, image: &RgbImage, mode: DetectionMode) -> Result<Vec<BoundingBox>, ExtractError> {
        Ok(self.detector.detect(image, mode)?)
    }

    fn embed(&mut self, image: &RgbImage, region: &BoundingBox) -> Result<Embedding, ExtractError> {
        Ok(self.recognizer.extract(image, region)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(size: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x: 0.0, y: 0.0, width: size, height: size, confidence, landmarks: None,
        }
    }

    /// Reports canned regions and embeds each as its (width, confidence).
    struct Canned(Vec<BoundingBox>);

    impl FeatureExtractor for Canned {
        fn mode(&self) -> DetectionMode {
            DetectionMode::Accurate
        }

        fn detect(&mut self, image: &RgbImage, _mode: DetectionMode) -> Result<Vec<BoundingBox>, ExtractError> {
            if image.width() == 0 {
                return Err(ExtractError::InvalidInput("empty".into()));
            }
            Ok(self.0.clone())
        }

        fn embed(&mut self, _image: &RgbImage, region: &BoundingBox) -> Result<Embedding, ExtractError> {
            Ok(Embedding::new(vec![region.width, region.confidence]))
        }
    }

    #[test]
    fn test_order_regions_largest_first() {
        let mut regions = vec![bbox(10.0, 0.99), bbox(50.0, 0.6), bbox(30.0, 0.8)];
        order_regions(&mut regions);
        let widths: Vec<f32> = regions.iter().map(|r| r.width).collect();
        assert_eq!(widths, vec![50.0, 30.0, 10.0]);
    }

    #[test]
    fn test_order_regions_tie_broken_by_confidence() {
        let mut regions = vec![bbox(20.0, 0.6), bbox(20.0, 0.9)];
        order_regions(&mut regions);
        assert!((regions[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_extract_embeds_every_region_in_order() {
        let mut ex = Canned(vec![bbox(10.0, 0.9), bbox(40.0, 0.7)]);
        let features = ex.extract(&RgbImage::new(8, 8)).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].embedding.values, vec![40.0, 0.7]);
        assert_eq!(features[1].embedding.values, vec![10.0, 0.9]);
    }

    #[test]
    fn test_extract_zero_faces_is_empty() {
        let mut ex = Canned(vec![]);
        assert!(ex.extract(&RgbImage::new(8, 8)).unwrap().is_empty());
    }

    #[test]
    fn test_detector_invalid_input_maps_to_input_error() {
        let err: ExtractError = DetectorError::InvalidInput("zero size".into()).into();
        assert!(matches!(err, ExtractError::InvalidInput(_)));
        let err: ExtractError = DetectorError::InferenceFailed("boom".into()).into();
        assert!(matches!(err, ExtractError::Detector(_)));
    }
}
