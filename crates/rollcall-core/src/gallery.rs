//! In-memory gallery of enrolled templates, backed by a [`TemplateStore`].
//!
//! Readers take a cheap `Arc` snapshot and match against it without holding
//! any lock; writers publish a new snapshot. Directory scans and enrollments
//! are serialized among themselves so a reload cannot drop a concurrent
//! enrollment.

use crate::extractor::ExtractError;
use crate::store::{validate_identity, validate_vector, SkippedFile, StoreError, TemplateStore};
use crate::types::{
    Embedding, EuclideanMatcher, FaceFeature, FaceTemplate, MatchResult, MatchStatus, Matcher,
    TemplateHandle,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{faces} faces detected; enrollment needs exactly one")]
    AmbiguousEnrollment { faces: usize },
    #[error("embedding has {actual} dimensions, gallery has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("feature extraction failed: {0}")]
    Extraction(ExtractError),
    #[error("template storage failed: {0}")]
    Io(StoreError),
}

impl From<ExtractError> for EnrollError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::InvalidInput(msg) => EnrollError::InvalidInput(msg),
            other => EnrollError::Extraction(other),
        }
    }
}

impl From<StoreError> for EnrollError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidIdentity(id) => EnrollError::InvalidInput(format!("invalid identity {id:?}")),
            other => EnrollError::Io(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("feature extraction failed: {0}")]
    Extraction(ExtractError),
}

impl From<ExtractError> for RecognizeError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::InvalidInput(msg) => RecognizeError::InvalidInput(msg),
            other => RecognizeError::Extraction(other),
        }
    }
}

/// Result of a load pass.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: Vec<SkippedFile>,
}

pub struct Gallery {
    store: TemplateStore,
    tolerance: f32,
    snapshot: RwLock<Arc<Vec<FaceTemplate>>>,
    loaded: AtomicBool,
    /// Serializes load passes and enrollments.
    update: Mutex<()>,
}

impl Gallery {
    /// Create an empty, not-yet-loaded gallery.
    pub fn new(store: TemplateStore, tolerance: f32) -> Self {
        Self {
            store,
            tolerance,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            loaded: AtomicBool::new(false),
            update: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.snapshot().iter().any(|t| t.identity == identity)
    }

    /// Enrolled identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().iter().map(|t| t.identity.clone()).collect();
        ids.sort();
        ids
    }

    fn snapshot(&self) -> Arc<Vec<FaceTemplate>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rescan the backing directory and replace the in-memory collection.
    pub fn load(&self) -> Result<LoadSummary, StoreError> {
        let _update = self.update.lock().unwrap_or_else(PoisonError::into_inner);

        let report = self.store.load_all()?;
        let loaded = report.templates.len();

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(report.templates);
        self.loaded.store(true, Ordering::Release);

        tracing::info!(
            dir = %self.store.dir().display(),
            loaded,
            skipped = report.skipped.len(),
            "gallery loaded"
        );

        Ok(LoadSummary {
            loaded,
            skipped: report.skipped,
        })
    }

    /// Load if never loaded or currently empty. Returns the gallery size.
    ///
    /// An unreadable directory counts as empty.
    pub fn ensure_loaded(&self) -> usize {
        if self.is_loaded() && !self.is_empty() {
            return self.len();
        }
        match self.load() {
            Ok(summary) => summary.loaded,
            Err(e) => {
                tracing::warn!(error = %e, "gallery load failed; treating as empty");
                0
            }
        }
    }

    /// Persist the single face in `features` under `identity` and publish it.
    pub fn enroll(&self, identity: &str, features: Vec<FaceFeature>) -> Result<TemplateHandle, EnrollError> {
        validate_identity(identity)?;

        let embedding = single_embedding(features)?;
        validate_vector(&embedding.values)
            .map_err(|reason| EnrollError::InvalidInput(format!("unusable embedding: {reason}")))?;

        // The dimension check below needs whatever is already on disk.
        if !self.is_loaded() {
            if let Err(e) = self.load() {
                tracing::warn!(error = %e, "gallery load before enrollment failed");
            }
        }

        let _update = self.update.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(expected) = self.snapshot().first().map(|t| t.embedding.dim()) {
            if expected != embedding.dim() {
                return Err(EnrollError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
        }

        let template = FaceTemplate {
            identity: identity.to_string(),
            embedding,
            enrolled_at: Some(Utc::now()),
        };
        let path = self.store.write(&template)?;
        self.publish(template);

        tracing::info!(identity, path = %path.display(), "face enrolled");

        Ok(TemplateHandle {
            identity: identity.to_string(),
            path,
        })
    }

    fn publish(&self, template: FaceTemplate) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let templates = Arc::make_mut(&mut *guard);

        match templates.iter_mut().find(|t| t.identity == template.identity) {
            Some(existing) => {
                tracing::warn!(identity = %template.identity, "identity re-enrolled; replacing previous template");
                *existing = template;
            }
            None => templates.push(template),
        }
    }

    /// Match extracted faces against the current snapshot.
    ///
    /// Faces are tried in order; the first one whose nearest template is
    /// closer than the tolerance wins. A face whose embedding dimension
    /// differs from the gallery's is not comparable and is skipped.
    pub fn match_features(&self, features: &[FaceFeature]) -> MatchResult {
        if features.is_empty() {
            return MatchResult::unmatched(MatchStatus::NoFaceDetected);
        }

        let gallery = self.snapshot();
        let Some(dim) = gallery.first().map(|t| t.embedding.dim()) else {
            return MatchResult::unmatched(MatchStatus::EmptyGallery);
        };

        for (face, feature) in features.iter().enumerate() {
            if feature.embedding.dim() != dim {
                tracing::warn!(
                    face,
                    probe_dim = feature.embedding.dim(),
                    gallery_dim = dim,
                    "embedding dimension differs from gallery; face not compared"
                );
                continue;
            }
            let cmp = EuclideanMatcher.compare(&feature.embedding, &gallery, self.tolerance);
            tracing::debug!(
                face,
                nearest = ?cmp.best.map(|(i, _)| gallery[i].identity.as_str()),
                distance = ?cmp.best.map(|(_, d)| d),
                matched = cmp.matched,
                "face compared"
            );

            if let (true, Some((idx, distance))) = (cmp.matched, cmp.best) {
                let result = MatchResult::matched(gallery[idx].identity.clone(), distance);
                tracing::info!(
                    identity = %gallery[idx].identity,
                    confidence = result.confidence,
                    "face recognized"
                );
                return result;
            }
        }

        MatchResult::unmatched(MatchStatus::NoMatch)
    }
}

fn single_embedding(features: Vec<FaceFeature>) -> Result<Embedding, EnrollError> {
    let faces = features.len();
    let mut iter = features.into_iter();
    match (iter.next(), faces) {
        (None, _) => Err(EnrollError::NoFaceDetected),
        (Some(feature), 1) => Ok(feature.embedding),
        (Some(_), _) => Err(EnrollError::AmbiguousEnrollment { faces }),
    }
}
