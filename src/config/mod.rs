//! Application Configuration
//!
//! User settings stored in TOML format, with environment overrides for
//! secrets and deployment-specific values.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tracker::geometry::{AngleDomain, Topology};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Rep tracking settings
    pub tracker: TrackerSettings,
    /// Session summary sync settings
    pub activity: ActivitySettings,
    /// OCR extraction settings
    pub ocr: OcrSettings,
    /// Report refinement providers
    pub refine: RefineSettings,
    /// HTTP server settings
    pub server: ServerSettings,
    /// Database settings
    pub database: DatabaseSettings,
}

/// Rep tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Camera device index
    pub camera_index: u32,
    /// Landmark topology produced by the pose estimator
    pub topology: Topology,
    /// Joint angle calibration range mapped onto 100%..0%.
    /// Observed deployments used both 90-160 and 70-160 for push-ups.
    pub angle_domain: AngleDomain,
    /// Percentage at or above which both limbs count as extended
    pub upper_threshold: f32,
    /// Percentage at or below which both limbs count as contracted
    pub lower_threshold: f32,
    /// Fold reflex angles (> 180) back into 0..180
    pub fold_reflex_angles: bool,
    /// Minimum mean keypoint confidence for a pose to be used
    pub min_pose_confidence: f32,
    /// Exercise label reported in session summaries
    pub exercise_type: String,
    /// JPEG quality for the video stream (1-100)
    pub jpeg_quality: u8,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            topology: Topology::Coco17,
            angle_domain: AngleDomain::new(70.0, 160.0),
            upper_threshold: 90.0,
            lower_threshold: 10.0,
            fold_reflex_angles: true,
            min_pose_confidence: 0.3,
            exercise_type: "pushup".to_string(),
            jpeg_quality: 80,
        }
    }
}

/// Session summary sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySettings {
    /// Endpoint receiving the summary POST (None disables sync)
    pub endpoint: Option<String>,
    /// User the sessions are recorded for
    pub user_id: i64,
    /// Metabolic equivalent of the exercise
    pub met: f64,
    /// Assumed body weight in kilograms
    pub body_weight_kg: f64,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            endpoint: Some("http://localhost/RapiReport/backend/api/save_exercise.php".to_string()),
            user_id: 1,
            met: 8.0,
            body_weight_kg: 70.0,
            timeout_secs: 10,
        }
    }
}

/// OCR extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Fragments at or below this confidence are dropped
    pub min_confidence: f32,
    /// Binarization threshold applied to the detection probability map
    pub detection_threshold: f32,
    /// Where uploaded images are kept for display
    pub upload_dir: PathBuf,
    /// Scratch directory for in-flight uploads
    pub temp_dir: PathBuf,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.1,
            detection_threshold: 0.3,
            upload_dir: PathBuf::from("uploads/ocr"),
            temp_dir: PathBuf::from("temp"),
        }
    }
}

/// Report refinement provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineSettings {
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// Preferred Gemini model, tried before the built-in list
    pub gemini_model: Option<String>,
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI chat model
    pub openai_model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: None,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address for the tracker video service
    pub tracker_addr: String,
    /// Bind address for the OCR upload service
    pub ocr_addr: String,
    /// Allowed CORS origins; `*` allows all
    pub cors_origins: Vec<String>,
    /// Largest accepted upload body in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            tracker_addr: "0.0.0.0:5000".to_string(),
            ocr_addr: "0.0.0.0:8000".to_string(),
            cors_origins: vec!["*".to_string()],
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file; None uses `<data dir>/rapireport.db`
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Apply environment overrides on top of file settings
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = get("GEMINI_API_KEY") {
            self.refine.gemini_api_key = Some(key);
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.refine.gemini_model = Some(model);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.refine.openai_api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.refine.openai_model = model;
        }
        if let Some(raw) = lookup("OCR_CORS_ORIGINS") {
            self.server.cors_origins = parse_cors_origins(&raw);
        }
        if let Some(path) = get("RAPI_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(endpoint) = get("RAPI_SUMMARY_ENDPOINT") {
            self.activity.endpoint = Some(endpoint);
        }
        if let Some(user_id) = get("RAPI_USER_ID").and_then(|v| v.parse().ok()) {
            self.activity.user_id = user_id;
        }
    }
}

/// Parse a comma separated origin list; empty means allow all
pub fn parse_cors_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect();

    if origins.is_empty() {
        vec!["*".to_string()]
    } else {
        origins
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
