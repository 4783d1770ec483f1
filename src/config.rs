use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::track::TrackerKind;

const DEFAULT_WORKDIR: &str = "videos";
const DEFAULT_VIDEO: &str = "default.mp4";
const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "y4m"];
const DEFAULT_CONFIDENCE: f32 = 0.4;
#[cfg(feature = "backend-tract")]
const DEFAULT_BACKEND: &str = "tract";
#[cfg(not(feature = "backend-tract"))]
const DEFAULT_BACKEND: &str = "replay";
const DEFAULT_FONT_SCALE: f32 = 28.0;
const DEFAULT_THICKNESS: u32 = 2;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    workdir: Option<PathBuf>,
    default_video: Option<String>,
    output_dir: Option<PathBuf>,
    allowed_extensions: Option<Vec<String>>,
    detection: Option<DetectionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    backend: Option<String>,
    model: Option<PathBuf>,
    replay: Option<PathBuf>,
    labels: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackingConfigFile {
    enabled: Option<bool>,
    tracker: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    font: Option<PathBuf>,
    font_scale: Option<f32>,
    thickness: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Holds the default video and per-session upload directories.
    pub workdir: PathBuf,
    /// File name of the bundled default video inside `workdir`.
    pub default_video: String,
    pub output_dir: PathBuf,
    /// Lowercase, without the leading dot.
    pub allowed_extensions: Vec<String>,
    pub detection: DetectionSettings,
    pub tracking: TrackingSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence: f32,
    pub backend: String,
    pub model: Option<PathBuf>,
    pub replay: Option<PathBuf>,
    pub labels: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub enabled: bool,
    /// Raw tracker name; parsed during validation.
    pub tracker: String,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub font: Option<PathBuf>,
    pub font_scale: f32,
    pub thickness: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        // An empty file yields every default; this cannot fail.
        Self::from_file(AppConfigFile::default())
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VDETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: AppConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        Self {
            workdir: file
                .workdir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKDIR)),
            default_video: file
                .default_video
                .unwrap_or_else(|| DEFAULT_VIDEO.to_string()),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            allowed_extensions: file
                .allowed_extensions
                .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()),
            detection: DetectionSettings {
                confidence: detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                backend: detection
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model: detection.model,
                replay: detection.replay,
                labels: detection.labels,
            },
            tracking: TrackingSettings {
                enabled: tracking.enabled.unwrap_or(true),
                tracker: tracking
                    .tracker
                    .unwrap_or_else(|| TrackerKind::default().as_str().to_string()),
            },
            overlay: OverlaySettings {
                font: overlay.font,
                font_scale: overlay.font_scale.unwrap_or(DEFAULT_FONT_SCALE),
                thickness: overlay.thickness.unwrap_or(DEFAULT_THICKNESS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = non_empty_var("VDETECT_WORKDIR") {
            self.workdir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_var("VDETECT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(confidence) = non_empty_var("VDETECT_CONFIDENCE") {
            self.detection.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("VDETECT_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(tracker) = non_empty_var("VDETECT_TRACKER") {
            if tracker.trim().eq_ignore_ascii_case("none") {
                self.tracking.enabled = false;
            } else {
                self.tracking.enabled = true;
                self.tracking.tracker = tracker.trim().to_string();
            }
        }
        if let Some(backend) = non_empty_var("VDETECT_BACKEND") {
            self.detection.backend = backend.trim().to_string();
        }
        if let Some(model) = non_empty_var("VDETECT_MODEL") {
            self.detection.model = Some(PathBuf::from(model));
        }
        if let Some(font) = non_empty_var("VDETECT_FONT") {
            self.overlay.font = Some(PathBuf::from(font));
        }
        Ok(())
    }

    /// Check ranges and normalise extensions. Called again after CLI overrides.
    pub fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.confidence) {
            return Err(anyhow!(
                "confidence must be within [0, 1], got {}",
                self.detection.confidence
            ));
        }
        if !(self.overlay.font_scale > 0.0) {
            return Err(anyhow!("overlay font_scale must be greater than zero"));
        }
        if self.overlay.thickness == 0 {
            return Err(anyhow!("overlay thickness must be at least 1"));
        }
        self.tracker_kind()?;

        self.allowed_extensions = self
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.allowed_extensions.is_empty() {
            return Err(anyhow!("allowed_extensions must name at least one extension"));
        }
        if self.default_video.trim().is_empty() {
            return Err(anyhow!("default_video must not be empty"));
        }
        Ok(())
    }

    pub fn tracker_kind(&self) -> Result<TrackerKind> {
        self.tracking.tracker.parse()
    }

    pub fn default_video_path(&self) -> PathBuf {
        self.workdir.join(&self.default_video)
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
