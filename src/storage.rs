//! Upload and result artifacts on local disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use regex::Regex;

/// Prefix marking an annotated output derived from an upload.
pub const RESULT_PREFIX: &str = "result_";

const PLACEHOLDER_STEM: &str = "upload";

/// An upload persisted under a collision-free name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredUpload {
    /// `<random hex>_<sanitized original name>`
    pub name: String,
    pub path: PathBuf,
}

impl StoredUpload {
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) if dot > 0 => &self.name[..dot],
            _ => &self.name,
        }
    }
}

/// Owns the upload and result directories.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    upload_dir: PathBuf,
    results_dir: PathBuf,
}

impl ArtifactStore {
    /// Create both directories if missing.
    pub fn open(upload_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            upload_dir: upload_dir.into(),
            results_dir: results_dir.into(),
        };
        for dir in [&store.upload_dir, &store.results_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(store)
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn save_upload(&self, original_name: &str, bytes: &[u8]) -> Result<StoredUpload> {
        let sanitized = sanitize_filename(original_name)
            .ok_or_else(|| anyhow!("filename {:?} has no usable characters", original_name))?;
        let name = format!("{}_{}", unique_prefix(), sanitized);
        let path = self.upload_dir.join(&name);
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write upload {}", path.display()))?;
        log::debug!("stored upload {} ({} bytes)", name, bytes.len());
        Ok(StoredUpload { name, path })
    }

    /// `result_<name>` inside the results directory.
    pub fn result_name_for(&self, upload_name: &str) -> String {
        format!("{}{}", RESULT_PREFIX, upload_name)
    }

    pub fn result_path(&self, result_name: &str) -> PathBuf {
        self.results_dir.join(result_name)
    }

    pub fn write_result(&self, result_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.result_path(result_name);
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write result {}", path.display()))?;
        Ok(path)
    }

    /// Best-effort removal of a partially written artifact.
    pub fn remove(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => log::debug!("removed artifact {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("failed to remove {}: {}", path.display(), err),
        }
    }

    /// Delete every regular file in both directories. Returns the count removed.
    pub fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [&self.upload_dir, &self.results_dir] {
            if !dir.exists() {
                continue;
            }
            let entries =
                fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                fs::remove_file(entry.path())
                    .with_context(|| format!("failed to delete {}", entry.path().display()))?;
                removed += 1;
            }
        }
        log::info!("purged {} stored artifacts", removed);
        Ok(removed)
    }
}

/// Reduce a client-supplied name to a safe single path component.
///
/// Stem and extension are cleaned separately: path separators and anything
/// outside `[A-Za-z0-9._-]` become `_`, and leading dots and underscores are
/// stripped from the stem. A stem with nothing usable left becomes `upload` so
/// the extension survives. Returns `None` when neither part is usable.
pub fn sanitize_filename(name: &str) -> Option<String> {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let (stem, extension) = match base.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let extension = extension
        .map(|ext| unsafe_chars.replace_all(ext, "_").trim_matches('_').to_string())
        .filter(|ext| !ext.is_empty());
    let stem = unsafe_chars
        .replace_all(stem, "_")
        .trim_start_matches(['.', '_'])
        .to_string();

    match (stem.is_empty(), extension) {
        (false, Some(ext)) => Some(format!("{}.{}", stem, ext)),
        (false, None) => Some(stem),
        (true, Some(ext)) => Some(format!("{}.{}", PLACEHOLDER_STEM, ext)),
        (true, None) => None,
    }
}

/// Lowercased extension after the last dot, if any.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn unique_prefix() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
