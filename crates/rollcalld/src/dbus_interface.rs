use crate::engine::{EngineError, EngineHandle};
use image::RgbImage;
use rollcall_core::{Config, EnrollError, Gallery, RecognizeError};
use std::sync::Arc;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.rollcall.Engine1";
pub const OBJECT_PATH: &str = "/org/rollcall/Engine1";

/// D-Bus interface for the Rollcall daemon.
///
/// Bus name: org.rollcall.Engine1
/// Object path: /org/rollcall/Engine1
pub struct RollcallService {
    engine: EngineHandle,
    gallery: Arc<Gallery>,
    config: Config,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, gallery: Arc<Gallery>, config: Config) -> Self {
        Self {
            engine,
            gallery,
            config,
        }
    }
}

#[interface(name = "org.rollcall.Engine1")]
impl RollcallService {
    /// Enroll the single face in the image at `image_path`. Returns the template path.
    async fn enroll(&self, image_path: &str, identity: &str) -> fdo::Result<String> {
        tracing::info!(image_path, identity, "enroll requested");
        let image = decode_image(image_path).await?;
        let handle = self
            .engine
            .enroll(image, identity.to_string())
            .await
            .map_err(into_fdo)?;
        Ok(handle.path.to_string_lossy().into_owned())
    }

    /// Identify the person in the image. Returns a JSON match result.
    async fn recognize(&self, image_path: &str) -> fdo::Result<String> {
        tracing::info!(image_path, "recognize requested");
        let image = decode_image(image_path).await?;
        let result = self.engine.recognize(image).await.map_err(into_fdo)?;
        serde_json::to_string(&result).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Fast-mode face boxes as a JSON array.
    async fn preview(&self, image_path: &str) -> fdo::Result<String> {
        let image = decode_image(image_path).await?;
        let boxes = self.engine.preview(image).await.map_err(into_fdo)?;
        serde_json::to_string(&boxes).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Rescan the template directory. Returns the number of templates loaded.
    async fn reload(&self) -> fdo::Result<u32> {
        tracing::info!("reload requested");
        let summary = self.engine.reload().await.map_err(into_fdo)?;
        Ok(u32::try_from(summary.loaded).unwrap_or(u32::MAX))
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "detection_mode": self.config.detection_mode.as_str(),
            "tolerance": self.config.tolerance,
            "template_dir": self.config.template_dir.display().to_string(),
            "gallery_loaded": self.gallery.is_loaded(),
            "gallery_size": self.gallery.len(),
        })
        .to_string())
    }

    /// Enrolled identities, sorted.
    async fn list_identities(&self) -> fdo::Result<Vec<String>> {
        Ok(self.gallery.identities())
    }
}

async fn decode_image(path: &str) -> fdo::Result<RgbImage> {
    let owned = path.to_string();
    let decoded = tokio::task::spawn_blocking(move || image::open(&owned))
        .await
        .map_err(|e| fdo::Error::Failed(format!("image decode task failed: {e}")))?;
    match decoded {
        Ok(img) => Ok(img.to_rgb8()),
        Err(e) => {
            tracing::warn!(path, error = %e, "cannot decode image");
            Err(fdo::Error::InvalidArgs(format!("cannot decode image {path}: {e}")))
        }
    }
}

fn into_fdo(err: EngineError) -> fdo::Error {
    match err {
        EngineError::Enroll(EnrollError::InvalidInput(msg))
        | EngineError::Recognize(RecognizeError::InvalidInput(msg)) => fdo::Error::InvalidArgs(msg),
        EngineError::Extract(rollcall_core::ExtractError::InvalidInput(msg)) => fdo::Error::InvalidArgs(msg),
        other => fdo::Error::Failed(other.to_string()),
    }
}
