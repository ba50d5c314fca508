use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{DetectionThresholds, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD};

const DEFAULT_DB_PATH: &str = "birdfeeder.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_TOKEN_PATH: &str = "feeder_token";
const DEFAULT_MODEL_PATH: &str = "bird_image_classifier.onnx";
const DEFAULT_LABELS_PATH: &str = "class_names.txt";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CAPTURE_SOURCE: &str = "stub://feeder";
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_POLL_SECS: u64 = 15;

#[derive(Debug, Deserialize, Default)]
struct FeederConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    model: Option<ModelConfigFile>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    poll: Option<PollConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PollConfigFile {
    interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FeederConfig {
    pub db_path: String,
    pub api: ApiSettings,
    pub model: ModelSettings,
    pub capture: CaptureSettings,
    pub detection: DetectionThresholds,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub token_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub path: PathBuf,
    pub labels_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
}

impl FeederConfig {
    /// Defaults, then the file named by `BIRDFEEDER_CONFIG`, then environment
    /// overrides. The result is validated.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BIRDFEEDER_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FeederConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let poll = file.poll.unwrap_or_default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api: ApiSettings {
                addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
                token_path: api
                    .token_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
            },
            model: ModelSettings {
                backend: model.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                labels_path: model
                    .labels_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH)),
                input_width: model.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: model.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            capture: CaptureSettings {
                source: capture
                    .source
                    .unwrap_or_else(|| DEFAULT_CAPTURE_SOURCE.to_string()),
                width: capture.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
            },
            detection: DetectionThresholds {
                confidence: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                iou: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            poll_interval: Duration::from_secs(poll.interval_secs.unwrap_or(DEFAULT_POLL_SECS)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("BIRDFEEDER_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = env_string("BIRDFEEDER_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(path) = env_string("BIRDFEEDER_TOKEN_PATH") {
            self.api.token_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("BIRDFEEDER_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(path) = env_string("BIRDFEEDER_LABELS_PATH") {
            self.model.labels_path = PathBuf::from(path);
        }
        if let Some(backend) = env_string("BIRDFEEDER_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(source) = env_string("BIRDFEEDER_CAPTURE_SOURCE") {
            self.capture.source = source;
        }
        if let Some(secs) = env_parse::<u64>("BIRDFEEDER_POLL_SECS", "an integer number of seconds")? {
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(confidence) = env_parse::<f32>("BIRDFEEDER_CONFIDENCE", "a number")? {
            self.detection.confidence = confidence;
        }
        if let Some(iou) = env_parse::<f32>("BIRDFEEDER_IOU", "a number")? {
            self.detection.iou = iou;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detection.validate()?;
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input dimensions must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture dimensions must be greater than zero"));
        }
        self.model.backend = self.model.backend.trim().to_lowercase();
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {} (got '{}')", key, expected, raw)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<FeederConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
