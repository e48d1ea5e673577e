use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected face region and the embedding extracted from it.
#[derive(Debug, Clone)]
pub struct FaceFeature {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Detector operating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Reduced input resolution; suitable for live preview.
    Fast,
    /// Full input resolution; used for enrollment and match decisions.
    #[default]
    Accurate,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Fast => "fast",
            DetectionMode::Accurate => "accurate",
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown detection mode {0:?} (expected \"fast\" or \"accurate\")")]
pub struct ParseModeError(pub String);

impl FromStr for DetectionMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "hog" and "cnn" are the names older deployments used.
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(DetectionMode::Fast),
            "accurate" | "cnn" => Ok(DetectionMode::Accurate),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// An enrolled identity and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTemplate {
    pub identity: String,
    pub embedding: Embedding,
    pub enrolled_at: Option<DateTime<Utc>>,
}

/// Location of a persisted template, returned from enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateHandle {
    pub identity: String,
    pub path: PathBuf,
}

/// Terminal state of a recognition call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Matched,
    EmptyGallery,
    NoFaceDetected,
    NoMatch,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Matched => "Matched",
            MatchStatus::EmptyGallery => "EmptyGallery",
            MatchStatus::NoFaceDetected => "NoFaceDetected",
            MatchStatus::NoMatch => "NoMatch",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a recognition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity: Option<String>,
    /// `1 - distance` of the match, clamped to [0, 1]. Zero unless matched.
    pub confidence: f32,
    pub status: MatchStatus,
}

impl MatchResult {
    pub fn matched(identity: String, distance: f32) -> Self {
        Self {
            identity: Some(identity),
            confidence: confidence_from_distance(distance),
            status: MatchStatus::Matched,
        }
    }

    pub fn unmatched(status: MatchStatus) -> Self {
        Self {
            identity: None,
            confidence: 0.0,
            status,
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == MatchStatus::Matched
    }
}

/// Inverse-distance proxy reported alongside a match. Not a probability.
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Outcome of comparing one probe against a gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    /// Index and distance of the nearest template, if the gallery is non-empty.
    pub best: Option<(usize, f32)>,
    pub matched: bool,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceTemplate], tolerance: f32) -> Comparison;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Always iterates ALL gallery entries; a match is declared only when the
/// nearest distance is strictly below the tolerance. Templates of a different
/// dimension, and non-finite distances, are never candidates.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceTemplate], tolerance: f32) -> Comparison {
        let mut best: Option<(usize, f32)> = None;

        for (i, template) in gallery.iter().enumerate() {
            if template.embedding.dim() != probe.dim() {
                continue;
            }
            let dist = probe.euclidean_distance(&template.embedding);
            if !dist.is_finite() {
                continue;
            }
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((i, dist)),
            }
        }

        Comparison {
            best,
            matched: matches!(best, Some((_, d)) if d < tolerance),
        }
    }
}
