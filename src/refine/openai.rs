//! OpenAI chat completions provider (text only)

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::{http_client, is_placeholder_key, RefineError, RefinementProvider, RefinementSource, SYSTEM_PROMPT};

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.3;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

pub struct OpenAiProvider {
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>, model: String, timeout: Duration) -> Self {
        Self { api_key, model, timeout }
    }

    fn request_body(&self, raw_text: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Here is the raw OCR text:\n{}", raw_text) },
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        })
    }
}

impl RefinementProvider for OpenAiProvider {
    fn source(&self) -> RefinementSource {
        RefinementSource::OpenAi
    }

    fn attempt(&self, raw_text: &str, _image: Option<&Path>) -> Result<String, RefineError> {
        let api_key = match self.api_key.as_deref() {
            Some(key) if !is_placeholder_key(Some(key)) => key,
            _ => return Err(RefineError::NotConfigured("OpenAI")),
        };

        let response = http_client(self.timeout)?
            .post(COMPLETIONS_URL)
            .bearer_auth(api_key)
            .json(&self.request_body(raw_text))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefineError::Api {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let parsed: ChatResponse = response.json()?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(RefineError::EmptyResponse)
    }
}
