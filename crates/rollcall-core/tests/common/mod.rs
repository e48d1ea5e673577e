#![allow(dead_code)]

use image::{Rgb, RgbImage};
use rollcall_core::{BoundingBox, DetectionMode, Embedding, ExtractError, FeatureExtractor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Extractor that looks faces up by the colour of the image's top-left pixel.
///
/// Each registered face is reported as a box whose width encodes its index,
/// so `embed` can find the vector again.
#[derive(Clone, Default)]
pub struct ScriptedExtractor {
    faces: HashMap<[u8; 3], Vec<Vec<f32>>>,
    pub mode: DetectionMode,
    pub calls: Arc<AtomicUsize>,
    pub modes_seen: Arc<Mutex<Vec<DetectionMode>>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faces(mut self, key: [u8; 3], vectors: Vec<Vec<f32>>) -> Self {
        self.faces.insert(key, vectors);
        self
    }

    pub fn detect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A small image keyed for [`ScriptedExtractor`].
pub fn image_of(key: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(16, 16, Rgb(key))
}

impl FeatureExtractor for ScriptedExtractor {
    fn mode(&self) -> DetectionMode {
        self.mode
    }

    fn detect(&mut self, image: &RgbImage, mode: DetectionMode) -> Result<Vec<BoundingBox>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modes_seen.lock().unwrap().push(mode);

        if image.width() == 0 || image.height() == 0 {
            return Err(ExtractError::InvalidInput("image has zero size".into()));
        }
        let key = image.get_pixel(0, 0).0;
        let count = self.faces.get(&key).map_or(0, Vec::len);

        // Later faces are larger, so they sort first.
        Ok((0..count)
            .map(|i| BoundingBox {
                x: 0.0,
                y: 0.0,
                width: (i + 1) as f32,
                height: (i + 1) as f32,
                confidence: 0.9,
                landmarks: None,
            })
            .collect())
    }

    fn embed(&mut self, image: &RgbImage, region: &BoundingBox) -> Result<Embedding, ExtractError> {
        let key = image.get_pixel(0, 0).0;
        let index = region.width as usize - 1;
        let values = self
            .faces
            .get(&key)
            .and_then(|faces| faces.get(index))
            .cloned()
            .ok_or_else(|| ExtractError::InvalidInput("unknown region".into()))?;
        Ok(Embedding::new(values))
    }
}

/// Project `values` onto the radius-0.5 sphere used by real embeddings.
pub fn on_sphere(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    values.iter().map(|v| v / norm * 0.5).collect()
}
