use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::ingest::CameraSettings;
use crate::pipeline::Thresholds;

const DEFAULT_MODEL_PATH: &str = "model/best.onnx";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_UPLOAD_FOLDER: &str = "uploads";
const DEFAULT_RESULTS_FOLDER: &str = "results";
const DEFAULT_MAX_RECENT_DETECTIONS: usize = 50;
const DEFAULT_MAX_CONTENT_LENGTH: u64 = 16 * 1024 * 1024;
const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Names the optional JSON (or `.toml`) config file.
pub const CONFIG_ENV: &str = "SAFETY_MONITOR_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    storage: Option<StorageConfigFile>,
    stats: Option<StatsConfigFile>,
    jpeg_quality: Option<u8>,
    debug: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_folder: Option<PathBuf>,
    results_folder: Option<PathBuf>,
    max_content_length: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StatsConfigFile {
    max_recent_detections: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub model_path: PathBuf,
    pub model_input_size: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub camera_index: u32,
    pub camera: CameraSettings,
    pub upload_folder: PathBuf,
    pub results_folder: PathBuf,
    pub max_recent_detections: usize,
    pub max_content_length: u64,
    pub jpeg_quality: u8,
    /// Verbose logging by default (`RUST_LOG` still wins).
    pub debug: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// Defaults, then the file named by `SAFETY_MONITOR_CONFIG`, then
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.confidence_threshold,
            iou: self.nms_threshold,
        }
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        Self {
            model_path: model
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            model_input_size: model.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            confidence_threshold: model
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            nms_threshold: model.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            camera_index: camera.index.unwrap_or(DEFAULT_CAMERA_INDEX),
            camera: CameraSettings {
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                fps: camera.fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
            upload_folder: storage
                .upload_folder
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_FOLDER)),
            results_folder: storage
                .results_folder
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_FOLDER)),
            max_recent_detections: file
                .stats
                .and_then(|stats| stats.max_recent_detections)
                .unwrap_or(DEFAULT_MAX_RECENT_DETECTIONS),
            max_content_length: storage
                .max_content_length
                .unwrap_or(DEFAULT_MAX_CONTENT_LENGTH),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            debug: file.debug.unwrap_or(false),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(size) = env_parse("MODEL_INPUT_SIZE")? {
            self.model_input_size = size;
        }
        if let Some(threshold) = env_parse("CONFIDENCE_THRESHOLD")? {
            self.confidence_threshold = threshold;
        }
        if let Some(threshold) = env_parse("NMS_THRESHOLD")? {
            self.nms_threshold = threshold;
        }
        if let Some(index) = env_parse("CAMERA_INDEX")? {
            self.camera_index = index;
        }
        if let Some(dir) = env_string("UPLOAD_FOLDER") {
            self.upload_folder = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("RESULTS_FOLDER") {
            self.results_folder = PathBuf::from(dir);
        }
        if let Some(capacity) = env_parse("MAX_RECENT_DETECTIONS")? {
            self.max_recent_detections = capacity;
        }
        if let Some(debug) = env_string("SAFETY_MONITOR_DEBUG") {
            self.debug = matches!(debug.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if self.max_recent_detections == 0 {
            return Err(anyhow!("max_recent_detections must be greater than zero"));
        }
        if self.model_input_size == 0 || self.model_input_size % 32 != 0 {
            return Err(anyhow!(
                "model_input_size must be a non-zero multiple of 32, got {}",
                self.model_input_size
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if self.max_content_length == 0 {
            return Err(anyhow!("max_content_length must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(None),
    }
}
