//! rollcall-core: face enrollment and recognition engine.
//!
//! SCRFD detection and ArcFace embeddings via ONNX Runtime, matched by
//! Euclidean distance against a gallery of one-file-per-identity templates.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod engine;
pub mod extractor;
pub mod gallery;
pub mod recognizer;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError};
pub use detector::FaceDetector;
pub use engine::Engine;
pub use extractor::{ExtractError, FeatureExtractor, OnnxExtractor};
pub use gallery::{EnrollError, Gallery, LoadSummary, RecognizeError};
pub use recognizer::FaceRecognizer;
pub use store::{StoreError, TemplateStore};
pub use types::{
    BoundingBox, DetectionMode, Embedding, EuclideanMatcher, FaceFeature, FaceTemplate, MatchResult,
    MatchStatus, Matcher, TemplateHandle,
};
