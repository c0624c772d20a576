//! OCR upload service: prescription scan → raw text → refined report

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tiny_http::{Method, Request, ResponseBox};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::multipart::{self, Form};
use super::{json_response, request_header, split_url, HttpError, RequestHandler};
use crate::config::{OcrSettings, ServerSettings};
use crate::refine::RefinementChain;
use crate::storage::{Database, OcrHistoryRecord};
use crate::vision::{is_error_text, TextExtractor};

const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Serialize, PartialEq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub database: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UploadResponse {
    pub raw: String,
    pub refined: String,
    #[serde(rename = "imagePath")]
    pub image_path: String,
}

/// Saved extension: `.jpg`, `.jpeg` or `.png`, anything else becomes `.jpg`
pub fn coerce_extension(filename: Option<&str>) -> &'static str {
    let ext = filename
        .map(Path::new)
        .and_then(Path::extension)
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("jpeg") => ".jpeg",
        Some("png") => ".png",
        _ => ".jpg",
    }
}

/// Removes the wrapped file when dropped
struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = std::fs::remove_file(&self.0) {
                warn!("Failed to remove temp file {:?}: {}", self.0, e);
            }
        }
    }
}

/// Extraction, refinement and storage behind the upload endpoint
pub struct OcrService {
    extractor: Mutex<TextExtractor>,
    refiner: RefinementChain,
    database: Option<Database>,
    upload_dir: PathBuf,
    temp_dir: PathBuf,
    max_upload_bytes: usize,
}

impl OcrService {
    pub fn new(
        extractor: TextExtractor,
        refiner: RefinementChain,
        database: Option<Database>,
        ocr: &OcrSettings,
        server: &ServerSettings,
    ) -> anyhow::Result<Self> {
        for dir in [&ocr.upload_dir, &ocr.temp_dir] {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }

        Ok(Self {
            extractor: Mutex::new(extractor),
            refiner,
            database,
            upload_dir: ocr.upload_dir.clone(),
            temp_dir: ocr.temp_dir.clone(),
            max_upload_bytes: server.max_upload_bytes,
        })
    }

    pub fn health(&self) -> HealthResponse {
        let database = match &self.database {
            Some(db) => match db.ping() {
                Ok(()) => "ok",
                Err(e) => {
                    error!("Database health check failed: {:#}", e);
                    "error"
                }
            },
            None => "error",
        };

        HealthResponse {
            status: "ok",
            message: "OCR service is running",
            database,
        }
    }

    /// Handle a parsed upload form
    pub fn upload(&self, form: &Form) -> Result<UploadResponse, HttpError> {
        let file = form
            .get("file")
            .ok_or_else(|| HttpError::BadRequest("Missing file field".to_string()))?;

        let is_image = file
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("image/"));
        if !is_image {
            return Err(HttpError::BadRequest("Invalid image file. Please upload an image.".to_string()));
        }

        let user_id = match form.text("user_id").filter(|v| !v.is_empty()) {
            Some(value) => Some(
                value
                    .parse::<i64>()
                    .map_err(|_| HttpError::BadRequest(format!("Invalid user_id: {}", value)))?,
            ),
            None => None,
        };
        let saved_name = format!(
            "ocr_{}{}",
            Uuid::new_v4().simple(),
            coerce_extension(file.filename.as_deref())
        );
        let temp = TempFile(self.temp_dir.join(&saved_name));

        std::fs::write(&temp.0, &file.data).context("Failed to write upload")?;
        info!("Processing image for user {:?}: {}", user_id, saved_name);

        let raw = self.extractor.lock().extract_file(&temp.0);
        if is_error_text(&raw) {
            return Err(HttpError::BadRequest(format!("OCR failed: {}", raw)));
        }

        let refined = self.refiner.refine(&raw, Some(&temp.0));
        info!("Refined via {}", refined.source);

        std::fs::copy(&temp.0, self.upload_dir.join(&saved_name)).context("Failed to keep uploaded image")?;

        if let Some(user_id) = user_id.filter(|id| *id != 0) {
            self.store_history(user_id, &saved_name, &raw, &refined.text);
        }

        Ok(UploadResponse {
            raw,
            refined: refined.text,
            image_path: saved_name,
        })
    }

    fn store_history(&self, user_id: i64, image_path: &str, raw: &str, refined: &str) {
        let Some(db) = &self.database else {
            warn!("No database, OCR history for user {} not stored", user_id);
            return;
        };
        match db.insert_ocr_history(user_id, image_path, raw, refined) {
            Ok(_) => info!("Stored OCR history for user {}", user_id),
            Err(e) => error!("Failed to store OCR history: {:#}", e),
        }
    }

    pub fn history(&self, user_id: i64) -> Result<Vec<OcrHistoryRecord>, HttpError> {
        let db = self
            .database
            .as_ref()
            .ok_or_else(|| HttpError::Internal("Database unavailable".to_string()))?;
        Ok(db.list_ocr_history(user_id, HISTORY_LIMIT)?)
    }

    fn read_form(&self, request: &mut Request) -> Result<Form, HttpError> {
        let content_type = request_header(request, "Content-Type")
            .map(str::to_string)
            .ok_or(multipart::MultipartError::NotMultipart)?;

        if request.body_length().is_some_and(|len| len > self.max_upload_bytes) {
            return Err(HttpError::PayloadTooLarge(self.max_upload_bytes));
        }

        let mut body = Vec::new();
        request
            .as_reader()
            .take(self.max_upload_bytes as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|e| HttpError::BadRequest(format!("Failed to read body: {}", e)))?;
        if body.len() > self.max_upload_bytes {
            return Err(HttpError::PayloadTooLarge(self.max_upload_bytes));
        }

        Ok(multipart::parse(&content_type, &body)?)
    }
}

impl RequestHandler for OcrService {
    fn handle(&self, request: &mut Request) -> Result<ResponseBox, HttpError> {
        let method = request.method().clone();
        let (path, params) = split_url(request.url());
        let path = path.to_string();

        match (&method, path.as_str()) {
            (Method::Get, "/health") => Ok(json_response(200, &self.health())),
            (Method::Post, "/upload") => {
                let form = self.read_form(request)?;
                Ok(json_response(200, &self.upload(&form)?))
            }
            (Method::Get, "/history") => {
                let user_id = params
                    .get("user_id")
                    .and_then(|v| v.parse::<i64>().ok())
                    .ok_or_else(|| HttpError::BadRequest("user_id query parameter required".to_string()))?;
                Ok(json_response(200, &self.history(user_id)?))
            }
            (_, "/health" | "/upload" | "/history") => Err(HttpError::MethodNotAllowed),
            _ => Err(HttpError::NotFound),
        }
    }
}
