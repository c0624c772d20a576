//! Google Gemini provider (generateContent REST API)

use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::{http_client, is_placeholder_key, RefineError, RefinementProvider, RefinementSource, SYSTEM_PROMPT};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Tried in order after the configured model
const FALLBACK_MODELS: [&str; 4] = [
    "gemini-2.0-flash",
    "gemini-2.0-flash-001",
    "gemini-2.0-flash-lite",
    "gemini-flash-latest",
];

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub struct GeminiProvider {
    api_key: Option<String>,
    model: Option<String>,
    timeout: Duration,
    api_base: String,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, model: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            timeout,
            api_base: API_BASE.to_string(),
        }
    }

    /// Configured model first, then the built-in list, without repeats
    pub fn model_candidates(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        let configured = self.model.iter().map(|m| m.trim()).filter(|m| !m.is_empty());
        for model in configured.chain(FALLBACK_MODELS) {
            if !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }
        models
    }

    fn generate(
        &self,
        client: &reqwest::blocking::Client,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> Result<String, RefineError> {
        let url = format!("{}/{}:generateContent", self.api_base, model);
        let response = client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefineError::Api {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let parsed: GenerateResponse = response.json()?;
        response_text(parsed).ok_or(RefineError::EmptyResponse)
    }
}

impl RefinementProvider for GeminiProvider {
    fn source(&self) -> RefinementSource {
        RefinementSource::Gemini
    }

    fn attempt(&self, raw_text: &str, image: Option<&Path>) -> Result<String, RefineError> {
        let api_key = match self.api_key.as_deref() {
            Some(key) if !is_placeholder_key(Some(key)) => key,
            _ => return Err(RefineError::NotConfigured("Gemini")),
        };

        let inline_image = match image.filter(|path| path.exists()) {
            Some(path) => Some((mime_type(path), std::fs::read(path)?)),
            None => None,
        };
        let body = request_body(raw_text, inline_image.as_ref().map(|(mime, bytes)| (*mime, bytes.as_slice())));
        let client = http_client(self.timeout)?;

        let mut last_error = String::from("no models tried");
        for model in self.model_candidates() {
            match self.generate(&client, api_key, &model, &body) {
                Ok(text) if !text.trim().is_empty() => {
                    info!("Gemini answered using {}", model);
                    return Ok(text);
                }
                Ok(_) => {
                    warn!("Model {} returned no text", model);
                    last_error = format!("{}: empty response", model);
                }
                Err(e) if e.is_auth_failure() => {
                    warn!("Gemini rejected the API key: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Model {} failed: {}", model, e);
                    last_error = format!("{}: {}", model, e);
                }
            }
        }

        Err(RefineError::NoModels(last_error))
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// generateContent payload: system instruction, OCR text and optionally the scan
fn request_body(raw_text: &str, image: Option<(&str, &[u8])>) -> Value {
    let mut parts = vec![json!({
        "text": format!(
            "Raw OCR text:\n{}\n\nPlease process this prescription text and return a clean, structured medical report.",
            raw_text
        )
    })];

    if let Some((mime, bytes)) = image {
        parts.push(json!({
            "inline_data": {
                "mime_type": mime,
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            }
        }));
        parts.push(json!({
            "text": "Use the attached image to correct OCR errors, or read it directly where the OCR text is poor."
        }));
    }

    json!({
        "system_instruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
        "contents": [{ "role": "user", "parts": parts }],
    })
}

/// Concatenated text parts of the first candidate
fn response_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn provider(key: Option<&str>, model: Option<&str>) -> GeminiProvider {
        GeminiProvider::new(key.map(String::from), model.map(String::from), Duration::from_secs(1))
    }

    #[test]
    fn test_model_candidates_order() {
        let models = provider(None, Some("gemini-2.5-pro")).model_candidates();
        assert_eq!(models[0], "gemini-2.5-pro");
        assert_eq!(models[1], "gemini-2.0-flash");
        assert_eq!(models.len(), 5);

        // a configured model already in the list is not repeated
        let models = provider(None, Some("gemini-2.0-flash-lite")).model_candidates();
        assert_eq!(models.len(), 4);
        assert_eq!(models[0], "gemini-2.0-flash-lite");

        assert_eq!(provider(None, Some("  ")).model_candidates().len(), 4);
    }

    #[test]
    fn test_placeholder_key_is_not_configured() {
        let result = provider(Some("your_gemini_api_key_here"), None).attempt("text", None);
        assert!(matches!(result, Err(RefineError::NotConfigured("Gemini"))));
        assert!(matches!(provider(None, None).attempt("text", None), Err(RefineError::NotConfigured(_))));
    }

    #[test]
    fn test_request_body_with_image() {
        let body = request_body("Amoxil 250", Some(("image/png", b"png-bytes")));
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0]["text"].as_str().unwrap().contains("Amoxil 250"));
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "cG5nLWJ5dGVz");
        assert_eq!(body["system_instruction"]["parts"][0]["text"], SYSTEM_PROMPT);
    }

    #[test]
    fn test_request_body_text_only() {
        let body = request_body("Amoxil", None);
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_response_text() {
        let parsed: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "Prescribed " }, { "text": "Medications" }] } }]
        }))
        .unwrap();
        assert_eq!(response_text(parsed).as_deref(), Some("Prescribed Medications"));

        let blocked: GenerateResponse = serde_json::from_value(json!({ "promptFeedback": {} })).unwrap();
        assert!(response_text(blocked).is_none());
    }

    /// Answers every request with `status`, counting the requests
    fn stub_api(status: u16) -> (String, Arc<AtomicUsize>) {
        let server = crate::server::bind("127.0.0.1:0").unwrap();
        let addr = crate::server::local_addr(&server).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        thread::spawn(move || {
            for request in server.incoming_requests() {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = request.respond(tiny_http::Response::from_string("{}").with_status_code(tiny_http::StatusCode(status)));
            }
        });
        (format!("http://{}/v1beta/models", addr), hits)
    }

    #[test]
    fn test_rejected_key_stops_model_fallback() {
        let (api_base, hits) = stub_api(403);
        let mut gemini = provider(Some("bad-key"), None);
        gemini.api_base = api_base;

        let err = gemini.attempt("text", None).unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_errors_try_every_model() {
        let (api_base, hits) = stub_api(500);
        let mut gemini = provider(Some("key"), None);
        gemini.api_base = api_base;

        assert!(matches!(gemini.attempt("text", None), Err(RefineError::NoModels(_))));
        assert_eq!(hits.load(Ordering::SeqCst), FALLBACK_MODELS.len());
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("scan.PNG")), "image/png");
        assert_eq!(mime_type(Path::new("scan.jpeg")), "image/jpeg");
        assert_eq!(mime_type(Path::new("scan")), "image/jpeg");
    }
}
