use image::RgbImage;
use rollcall_core::{
    BoundingBox, EnrollError, Engine, ExtractError, FeatureExtractor, LoadSummary, MatchResult,
    RecognizeError, StoreError, TemplateHandle,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Recognize(#[from] RecognizeError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        image: RgbImage,
        identity: String,
        reply: oneshot::Sender<Result<TemplateHandle, EnrollError>>,
    },
    Recognize {
        image: RgbImage,
        reply: oneshot::Sender<Result<MatchResult, RecognizeError>>,
    },
    Preview {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, ExtractError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<LoadSummary, StoreError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T, E>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, E>>) -> EngineRequest,
    ) -> Result<T, EngineError>
    where
        EngineError: From<E>,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(result?)
    }

    pub async fn enroll(&self, image: RgbImage, identity: String) -> Result<TemplateHandle, EngineError> {
        self.call(|reply| EngineRequest::Enroll {
            image,
            identity,
            reply,
        })
        .await
    }

    pub async fn recognize(&self, image: RgbImage) -> Result<MatchResult, EngineError> {
        self.call(|reply| EngineRequest::Recognize { image, reply }).await
    }

    /// Fast-mode detection only.
    pub async fn preview(&self, image: RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        self.call(|reply| EngineRequest::Preview { image, reply }).await
    }

    pub async fn reload(&self) -> Result<LoadSummary, EngineError> {
        self.call(|reply| EngineRequest::Reload { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Requests are served one at a time; the thread exits once every
/// [`EngineHandle`] has been dropped.
pub fn spawn_engine<E>(mut engine: Engine<E>) -> Result<EngineHandle, EngineError>
where
    E: FeatureExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(mode = %engine.mode(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        image,
                        identity,
                        reply,
                    } => {
                        let result = engine.enroll(&image, &identity);
                        if let Err(e) = &result {
                            tracing::warn!(identity = %identity, error = %e, "enrollment rejected");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, reply } => {
                        let _ = reply.send(engine.recognize(&image));
                    }
                    EngineRequest::Preview { image, reply } => {
                        let _ = reply.send(engine.preview(&image));
                    }
                    EngineRequest::Reload { reply } => {
                        let _ = reply.send(engine.reload());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rollcall_core::{DetectionMode, Embedding, Gallery, MatchStatus, TemplateStore};
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Reports one face per entry in `faces` for any image whose first pixel
    /// is non-black; box width encodes the face index.
    struct Fixed {
        faces: Vec<Vec<f32>>,
    }

    impl FeatureExtractor for Fixed {
        fn mode(&self) -> DetectionMode {
            DetectionMode::Accurate
        }

        fn detect(&mut self, image: &RgbImage, _mode: DetectionMode) -> Result<Vec<BoundingBox>, ExtractError> {
            if image.width() == 0 || image.height() == 0 {
                return Err(ExtractError::InvalidInput("empty image".into()));
            }
            if image.get_pixel(0, 0) == &Rgb([0, 0, 0]) {
                return Ok(Vec::new());
            }
            Ok((0..self.faces.len())
                .map(|i| BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: (i + 1) as f32,
                    height: 1.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn embed(&mut self, _image: &RgbImage, region: &BoundingBox) -> Result<Embedding, ExtractError> {
            Ok(Embedding::new(self.faces[region.width as usize - 1].clone()))
        }
    }

    fn face_image() -> RgbImage {
        RgbImage::from_pixel(8, 8, Rgb([200, 180, 160]))
    }

    fn spawn(dir: &std::path::Path, faces: Vec<Vec<f32>>) -> (EngineHandle, Arc<Gallery>) {
        let gallery = Arc::new(Gallery::new(TemplateStore::new(dir), 0.55));
        let engine = Engine::new(Fixed { faces }, Arc::clone(&gallery));
        (spawn_engine(engine).unwrap(), gallery)
    }

    #[tokio::test]
    async fn test_enroll_and_recognize_through_handle() {
        let dir = tempdir().unwrap();
        let (handle, gallery) = spawn(dir.path(), vec![vec![0.3, 0.4]]);

        let empty = handle.recognize(face_image()).await.unwrap();
        assert_eq!(empty.status, MatchStatus::EmptyGallery);

        let enrolled = handle.enroll(face_image(), "S100".into()).await.unwrap();
        assert_eq!(enrolled.path, dir.path().join("S100.json"));
        assert!(gallery.contains("S100"));

        let result = handle.recognize(face_image()).await.unwrap();
        assert_eq!(result.identity.as_deref(), Some("S100"));
    }

    #[tokio::test]
    async fn test_enroll_outcomes_surface_as_errors() {
        let dir = tempdir().unwrap();
        let (handle, _) = spawn(dir.path(), vec![vec![0.3, 0.4], vec![0.4, 0.3]]);

        let err = handle.enroll(face_image(), "S1".into()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Enroll(EnrollError::AmbiguousEnrollment { faces: 2 })
        ));

        let err = handle
            .enroll(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])), "S1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Enroll(EnrollError::NoFaceDetected)));
    }

    #[tokio::test]
    async fn test_preview_and_reload() {
        let dir = tempdir().unwrap();
        let (handle, _) = spawn(dir.path(), vec![vec![0.3, 0.4], vec![0.4, 0.3]]);

        let boxes = handle.preview(face_image()).await.unwrap();
        assert_eq!(boxes.len(), 2);
        assert!(boxes[0].area() >= boxes[1].area());

        let summary = handle.reload().await.unwrap();
        assert_eq!(summary.loaded, 0);
    }

    #[tokio::test]
    async fn test_cloned_handles_share_engine() {
        let dir = tempdir().unwrap();
        let (handle, gallery) = spawn(dir.path(), vec![vec![0.5, 0.0]]);
        let other = handle.clone();

        handle.enroll(face_image(), "A".into()).await.unwrap();
        let result = other.recognize(face_image()).await.unwrap();
        assert_eq!(result.identity.as_deref(), Some("A"));
        assert_eq!(gallery.len(), 1);
    }
}
