//! On-disk template store: one JSON file per identity, no index.
//!
//! The file name is derived from the identity alone, so writes for the same
//! identity always land on the same path.

use crate::types::{Embedding, FaceTemplate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const TEMPLATE_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid identity {0:?}: must be non-empty and free of control characters")]
    InvalidIdentity(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed template {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Serialized form of a template.
#[derive(Debug, Serialize, Deserialize)]
struct TemplateFile {
    identity: String,
    vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enrolled_at: Option<DateTime<Utc>>,
}

/// A file that was present but could not be turned into a template.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a full directory scan.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub templates: Vec<FaceTemplate>,
    pub skipped: Vec<SkippedFile>,
}

/// Directory of per-identity template files.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backing file path for `identity`.
    pub fn path_for(&self, identity: &str) -> Result<PathBuf, StoreError> {
        validate_identity(identity)?;
        Ok(self
            .dir
            .join(format!("{}.{TEMPLATE_EXTENSION}", encode_identity(identity))))
    }

    /// Persist `template`, replacing any existing file for the same identity.
    ///
    /// Written to a hidden temporary first and renamed into place.
    pub fn write(&self, template: &FaceTemplate) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&template.identity)?;
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let record = TemplateFile {
            identity: template.identity.clone(),
            vector: template.embedding.values.clone(),
            model_version: template.embedding.model_version.clone(),
            enrolled_at: template.enrolled_at,
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self.dir.join(format!(".{file_name}.tmp"));

        let write_tmp = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&tmp, e));
        }
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(&path, e)
        })?;

        tracing::debug!(identity = %template.identity, path = %path.display(), "template written");
        Ok(path)
    }

    /// Read every template in the directory, in file-name order.
    ///
    /// A missing directory is an empty store. Individual bad files are
    /// reported in [`LoadReport::skipped`] and never abort the scan.
    pub fn load_all(&self) -> Result<LoadReport, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LoadReport::default()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(e) => tracing::warn!(dir = %self.dir.display(), error = %e, "unreadable directory entry"),
            }
        }
        paths.retain(|p| is_template_file(p));
        paths.sort();

        let mut report = LoadReport::default();
        let mut dim: Option<usize> = None;

        for path in paths {
            let result = read_template(&path).and_then(|t| match dim {
                Some(d) if d != t.embedding.dim() => Err(StoreError::Malformed {
                    path: path.clone(),
                    reason: format!("vector has {} dimensions, gallery has {d}", t.embedding.dim()),
                }),
                _ => Ok(t),
            });

            match result {
                Ok(template) => {
                    dim.get_or_insert(template.embedding.dim());
                    report.templates.push(template);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping template");
                    report.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

fn is_template_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible
        && path.is_file()
        && path.extension().and_then(|e| e.to_str()) == Some(TEMPLATE_EXTENSION)
}

fn read_template(path: &Path) -> Result<FaceTemplate, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let record: TemplateFile = serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;

    validate_vector(&record.vector).map_err(|reason| malformed(reason.into()))?;

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if decode_identity(stem).as_deref() != Some(record.identity.as_str()) {
        return Err(malformed(format!(
            "identity {:?} does not match file name",
            record.identity
        )));
    }

    Ok(FaceTemplate {
        identity: record.identity,
        embedding: Embedding {
            values: record.vector,
            model_version: record.model_version,
        },
        enrolled_at: record.enrolled_at,
    })
}

/// A storable vector is non-empty and entirely finite.
pub fn validate_vector(values: &[f32]) -> Result<(), &'static str> {
    if values.is_empty() {
        return Err("empty vector");
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err("vector contains non-finite values");
    }
    Ok(())
}

pub fn validate_identity(identity: &str) -> Result<(), StoreError> {
    if identity.is_empty() || identity.chars().any(char::is_control) {
        return Err(StoreError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

/// Encode an identity as a file stem.
///
/// ASCII alphanumerics, `-`, `_` and non-leading `.` pass through; every
/// other byte becomes `%XX`. Reversible via [`decode_identity`].
pub fn encode_identity(identity: &str) -> String {
    let mut out = String::with_capacity(identity.len());
    for (i, byte) in identity.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || (byte == b'.' && i > 0);
        if plain {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_identity`]. `None` for stems it could not have produced.
pub fn decode_identity(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn template(identity: &str, values: Vec<f32>) -> FaceTemplate {
        FaceTemplate {
            identity: identity.into(),
            embedding: Embedding::new(values),
            enrolled_at: None,
        }
    }

    #[test]
    fn test_encode_plain_identity_unchanged() {
        assert_eq!(encode_identity("S100"), "S100");
        assert_eq!(encode_identity("cs-2024_07.a"), "cs-2024_07.a");
    }

    #[test]
    fn test_encode_escapes_path_characters() {
        assert_eq!(encode_identity("../etc/passwd"), "%2E.%2Fetc%2Fpasswd");
        assert_eq!(encode_identity("a b"), "a%20b");
        assert_eq!(encode_identity("50%"), "50%25");
    }

    #[test]
    fn test_decode_inverts_encode() {
        for id in ["S100", "../x", "José Núñez", "a%b", ".hidden", "名前"] {
            assert_eq!(decode_identity(&encode_identity(id)).as_deref(), Some(id), "{id}");
        }
    }

    #[test]
    fn test_decode_rejects_truncated_escape() {
        assert_eq!(decode_identity("abc%2"), None);
        assert_eq!(decode_identity("abc%ZZ"), None);
    }

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[0.1, -0.2]).is_ok());
        assert_eq!(validate_vector(&[]), Err("empty vector"));
        assert!(validate_vector(&[0.1, f32::NAN]).is_err());
        assert!(validate_vector(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn test_validate_identity() {
        assert!(validate_identity("S100").is_ok());
        assert!(validate_identity("").is_err());
        assert!(validate_identity("bad\nid").is_err());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path().join("templates"));

        let path = store.write(&template("S100", vec![0.1, 0.2, 0.3])).unwrap();
        assert_eq!(path, dir.path().join("templates").join("S100.json"));

        let report = store.load_all().unwrap();
        assert!(report.skipped.is_empty());
        assert_eq!(report.templates, vec![template("S100", vec![0.1, 0.2, 0.3])]);
    }

    #[test]
    fn test_write_leaves_no_temporary() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        store.write(&template("S1", vec![0.5])).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["S1.json".to_string()]);
    }

    #[test]
    fn test_rewrite_same_identity_last_write_wins() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        let first = store.write(&template("S1", vec![0.1])).unwrap();
        let second = store.write(&template("S1", vec![0.9])).unwrap();
        assert_eq!(first, second);

        let report = store.load_all().unwrap();
        assert_eq!(report.templates.len(), 1);
        assert_eq!(report.templates[0].embedding.values, vec![0.9]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path().join("nope"));
        let report = store.load_all().unwrap();
        assert!(report.templates.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_corrupt_file_skipped_rest_loaded() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        store.write(&template("A", vec![0.1, 0.2])).unwrap();
        store.write(&template("C", vec![0.3, 0.4])).unwrap();
        fs::write(dir.path().join("B.json"), b"{not json").unwrap();

        let report = store.load_all().unwrap();
        let ids: Vec<&str> = report.templates.iter().map(|t| t.identity.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("B.json"));
    }

    #[test]
    fn test_mismatched_identity_and_dimension_skipped() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        store.write(&template("A", vec![0.1, 0.2])).unwrap();
        store.write(&template("B", vec![0.1, 0.2, 0.3])).unwrap();
        fs::write(dir.path().join("C.json"), br#"{"identity":"Z","vector":[0.1,0.2]}"#).unwrap();

        let report = store.load_all().unwrap();
        assert_eq!(report.templates.len(), 1);
        assert_eq!(report.templates[0].identity, "A");
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_minimal_file_without_metadata_loads() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("S7.json"), br#"{"identity":"S7","vector":[0.25,0.5]}"#).unwrap();
        let report = TemplateStore::new(dir.path()).load_all().unwrap();
        assert_eq!(report.templates, vec![template("S7", vec![0.25, 0.5])]);
    }

    #[test]
    fn test_non_template_files_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.txt"), b"hello").unwrap();
        fs::write(dir.path().join(".S1.json.tmp"), b"partial").unwrap();
        fs::create_dir(dir.path().join("sub.json")).unwrap();

        let report = TemplateStore::new(dir.path()).load_all().unwrap();
        assert!(report.templates.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_write_rejects_invalid_identity() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        assert!(matches!(
            store.write(&template("", vec![0.1])),
            Err(StoreError::InvalidIdentity(_))
        ));
    }
}
