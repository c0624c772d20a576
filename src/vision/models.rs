//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the pose and OCR models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Environment variable that forbids network downloads
pub const OFFLINE_ENV: &str = "RAPI_OFFLINE";

/// Model files used by the vision layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Single-person pose estimator (MoveNet, 17 keypoints)
    Pose,
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 4] = [
        ModelType::Pose,
        ModelType::Detection,
        ModelType::Recognition,
        ModelType::Dictionary,
    ];

    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Pose => "movenet.onnx",
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    /// Download URL, when the model is published somewhere we can fetch it.
    /// The pose model has to be exported and placed manually.
    pub fn download_url(&self) -> Option<&'static str> {
        match self {
            ModelType::Pose => None,
            ModelType::Detection => {
                Some("https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx")
            }
            ModelType::Recognition => {
                Some("https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx")
            }
            ModelType::Dictionary => {
                Some("https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt")
            }
        }
    }

    /// Plausible file size range, used as a cheap integrity check
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Pose => (1_000_000, 60_000_000),
            ModelType::Detection => (2_000_000, 5_000_000),
            ModelType::Recognition => (7_000_000, 10_000_000),
            ModelType::Dictionary => (500, 10_000),
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Pose => "Pose Estimation",
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager rooted in the application data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        let Ok(metadata) = std::fs::metadata(self.model_path(model_type)) else {
            return false;
        };
        let (min, max) = model_type.expected_size_range();
        (min..=max).contains(&metadata.len())
    }

    /// Availability and size of every model
    pub fn get_model_status(&self) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let size = std::fs::metadata(self.model_path(model_type)).ok().map(|m| m.len());
                (model_type, self.is_model_available(model_type), size)
            })
            .collect()
    }

    /// Return the model path, downloading the file first if needed
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        let Some(url) = model_type.download_url() else {
            anyhow::bail!(
                "{} model is not bundled; export it to ONNX and place it at {:?}",
                model_type.display_name(),
                path
            );
        };

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(download_file(url, &path))?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.record_download(model_type, sha256)?;
        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(path)
    }

    /// Download every fetchable model that is missing
    pub fn ensure_ocr_models(&self) -> Result<()> {
        for model_type in [ModelType::Detection, ModelType::Recognition, ModelType::Dictionary] {
            self.ensure_model(model_type)?;
        }
        Ok(())
    }

    fn record_download(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let metadata = std::fs::metadata(self.model_path(model_type))?;

        let downloaded_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at,
        };

        manifest.models.retain(|m| m.filename != info.filename);
        manifest.models.push(info);
        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        std::fs::write(manifest_path, serde_json::to_string_pretty(manifest)?)?;
        Ok(())
    }
}

/// Stream `url` into `path` through a temp file; returns the SHA-256 hex digest
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path).context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// ONNX Runtime session with its first input and output names resolved
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model has no inputs")?;

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        if output_names.is_empty() {
            anyhow::bail!("Model has no outputs");
        }

        debug!("Model loaded. Input: {}, Outputs: {:?}", input_name, output_names);

        Ok(Self {
            session,
            input_name,
            output_names,
        })
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Name of the first output tensor
    pub fn output_name(&self) -> &str {
        &self.output_names[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::Pose.filename(), "movenet.onnx");
        assert_eq!(ModelType::Detection.filename(), "det.onnx");
        assert_eq!(ModelType::Recognition.filename(), "rec.onnx");
        assert_eq!(ModelType::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_model_status_lists_all_models() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().join("models")).unwrap();
        let status = manager.get_model_status();
        assert_eq!(status.len(), 4);
        assert!(status.iter().all(|(_, available, size)| !available && size.is_none()));
    }

    #[test]
    fn test_undersized_file_is_not_available() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        std::fs::write(manager.model_path(ModelType::Dictionary), "a\nb\n").unwrap();
        assert!(!manager.is_model_available(ModelType::Dictionary));
    }

    #[test]
    fn test_pose_model_without_url_errors() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        let err = manager.ensure_model(ModelType::Pose).unwrap_err();
        assert!(err.to_string().contains("not bundled"));
    }

    #[test]
    fn test_manifest_roundtrip_on_disk() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_manifest().unwrap().models.is_empty());

        let manifest = ModelManifest {
            version: "1.0.0".to_string(),
            models: vec![ModelInfo {
                model_type: "Detection".to_string(),
                filename: "det.onnx".to_string(),
                size_bytes: 3,
                sha256: "abc".to_string(),
                downloaded_at: 7,
            }],
        };
        manager.save_manifest(&manifest).unwrap();
        let loaded = manager.load_manifest().unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].sha256, "abc");
    }
}
