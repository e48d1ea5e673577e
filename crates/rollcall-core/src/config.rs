use crate::types::DetectionMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_TOLERANCE: f32 = 0.55;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("tolerance must be in (0, 1], got {0}")]
    InvalidTolerance(f32),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Detector operating point for enroll/recognize.
    pub detection_mode: DetectionMode,
    /// Maximum embedding distance for a match (smaller = stricter).
    pub tolerance: f32,
    /// Directory holding one template file per identity.
    pub template_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
}

/// Optional TOML overlay; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    detection_mode: Option<DetectionMode>,
    tolerance: Option<f32>,
    template_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
}

impl Config {
    /// Defaults, then the TOML file named by `ROLLCALL_CONFIG`, then
    /// `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Some(text)
            }
            None => None,
        };
        Self::resolve(file.as_deref(), |key| std::env::var(key).ok())
    }

    fn resolve(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = data_dir(&env);
        let mut config = Config {
            detection_mode: DetectionMode::default(),
            tolerance: DEFAULT_TOLERANCE,
            template_dir: data_dir.join("templates"),
            model_dir: data_dir.join("models"),
        };

        if let Some(text) = file {
            let overlay: FileConfig = toml::from_str(text)?;
            if let Some(mode) = overlay.detection_mode {
                config.detection_mode = mode;
            }
            if let Some(tolerance) = overlay.tolerance {
                config.tolerance = tolerance;
            }
            if let Some(dir) = overlay.template_dir {
                config.template_dir = dir;
            }
            if let Some(dir) = overlay.model_dir {
                config.model_dir = dir;
            }
        }

        // FACE_MODEL / FACE_TOLERANCE are the pre-rollcall names.
        if let Some((key, raw)) = first_set(&env, &["ROLLCALL_DETECTION_MODE", "FACE_MODEL"]) {
            match raw.parse() {
                Ok(mode) => config.detection_mode = mode,
                Err(e) => tracing::warn!(key, error = %e, "ignoring invalid detection mode"),
            }
        }
        if let Some((key, raw)) = first_set(&env, &["ROLLCALL_TOLERANCE", "FACE_TOLERANCE"]) {
            match raw.trim().parse::<f32>() {
                Ok(tolerance) => config.tolerance = tolerance,
                Err(e) => tracing::warn!(key, value = %raw, error = %e, "ignoring invalid tolerance"),
            }
        }
        if let Some(dir) = env("ROLLCALL_TEMPLATE_DIR") {
            config.template_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env("ROLLCALL_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }

        if !(config.tolerance.is_finite() && config.tolerance > 0.0 && config.tolerance <= 1.0) {
            return Err(ConfigError::InvalidTolerance(config.tolerance));
        }

        Ok(config)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        model_path(&self.model_dir, "det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        model_path(&self.model_dir, "w600k_r50.onnx")
    }
}

fn model_path(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}

fn first_set<'k>(env: &impl Fn(&str) -> Option<String>, keys: &[&'k str]) -> Option<(&'k str, String)> {
    keys.iter().find_map(|&key| env(key).map(|value| (key, value)))
}

fn data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
