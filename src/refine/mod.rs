//! Report refinement
//!
//! Sends raw OCR text to language model providers in order and falls back
//! to a plain bullet cleanup when none of them answers.

pub mod gemini;
pub mod openai;

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RefineSettings;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Prefix on degraded-mode output
pub const FALLBACK_MARKER: &str = "[Fallback: APIs unavailable]";

/// Instructions given to every provider
pub const SYSTEM_PROMPT: &str = "You are a medical pharmacist. Your goal is to turn noisy OCR text from a \
prescription into a clean, structured medical report.

Guidelines:
1. Medications: extract each drug name with its dosage and frequency (for example Paracetamol 500mg, twice daily).
2. Spelling: correct misspelled medicine names (for example 'Paracetmol' becomes 'Paracetamol').
3. Context: where the text or image is unclear, pick the most plausible reading given medical context.
4. Layout: organise the report under these headings when they apply:
   - Patient Information
   - Prescribed Medications
   - Instructions
   - Additional Notes
5. Tone: keep a professional, clinical tone.";

const PLACEHOLDER_KEYS: [&str; 2] = ["your_gemini_api_key_here", "your_openai_api_key_here"];

/// True for a missing key, an empty key or a template placeholder
pub fn is_placeholder_key(key: Option<&str>) -> bool {
    match key.map(str::trim) {
        None | Some("") => true,
        Some(key) => PLACEHOLDER_KEYS.contains(&key),
    }
}

/// Why a provider produced no refinement
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("{0} API key not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("empty response")]
    EmptyResponse,
    #[error("no available models ({0})")]
    NoModels(String),
    #[error("could not read image: {0}")]
    Image(#[from] std::io::Error),
}

impl RefineError {
    /// Rejected credentials; other models under the same key fail the same way
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Api { status: 401 | 403, .. })
    }
}

/// Where the refined text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementSource {
    Gemini,
    OpenAi,
    Fallback,
}

impl fmt::Display for RefinementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gemini => "Gemini",
            Self::OpenAi => "OpenAI",
            Self::Fallback => "Fallback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementResult {
    pub text: String,
    pub source: RefinementSource,
    /// Set only when every strategy failed; `text` then carries the error
    pub error: Option<String>,
}

/// A language model service that can restructure OCR text
pub trait RefinementProvider {
    fn source(&self) -> RefinementSource;

    /// One refinement attempt. `image` is the scan the text came from.
    fn attempt(&self, raw_text: &str, image: Option<&Path>) -> Result<String, RefineError>;
}

/// Blocking client with the per-request timeout applied
fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, RefineError> {
    Ok(reqwest::blocking::Client::builder().timeout(timeout).build()?)
}

/// Bullet-list cleanup used when no provider answers.
///
/// Lines are trimmed and anything of three characters or fewer is dropped.
pub fn simple_cleanup(raw_text: &str) -> String {
    raw_text
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > 3)
        .map(|line| format!("• {}", line))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Ordered provider list with a cleanup fallback
pub struct RefinementChain {
    providers: Vec<Box<dyn RefinementProvider + Send + Sync>>,
}

impl RefinementChain {
    pub fn new(providers: Vec<Box<dyn RefinementProvider + Send + Sync>>) -> Self {
        Self { providers }
    }

    /// Gemini then OpenAI, configured from settings
    pub fn from_settings(settings: &RefineSettings) -> Self {
        let timeout = Duration::from_secs(settings.timeout_secs);
        Self::new(vec![
            Box::new(GeminiProvider::new(
                settings.gemini_api_key.clone(),
                settings.gemini_model.clone(),
                timeout,
            )),
            Box::new(OpenAiProvider::new(
                settings.openai_api_key.clone(),
                settings.openai_model.clone(),
                timeout,
            )),
        ])
    }

    pub fn refine(&self, raw_text: &str, image: Option<&Path>) -> RefinementResult {
        info!("Starting text refinement");
        let mut failures = Vec::new();

        for provider in &self.providers {
            let source = provider.source();
            info!("Attempting {} refinement", source);

            match provider.attempt(raw_text, image) {
                Ok(text) if !text.trim().is_empty() => {
                    info!("{} refinement successful", source);
                    return RefinementResult {
                        text,
                        source,
                        error: None,
                    };
                }
                Ok(_) => {
                    warn!("{} returned an empty refinement", source);
                    failures.push((source, RefineError::EmptyResponse.to_string()));
                }
                Err(RefineError::NotConfigured(name)) => {
                    info!("{} not configured, skipping", name);
                    failures.push((source, RefineError::NotConfigured(name).to_string()));
                }
                Err(e) => {
                    warn!("{} refinement failed: {}", source, e);
                    failures.push((source, e.to_string()));
                }
            }
        }

        warn!("All providers failed, using simple text cleanup");
        let cleaned = simple_cleanup(raw_text);
        if !cleaned.is_empty() {
            return RefinementResult {
                text: format!("{}\n\n{}", FALLBACK_MARKER, cleaned),
                source: RefinementSource::Fallback,
                error: None,
            };
        }

        let details = failures
            .iter()
            .map(|(source, reason)| format!("{}: {}", source, reason))
            .collect::<Vec<_>>()
            .join("\n");
        error!("All refinement methods failed:\n{}", details);

        RefinementResult {
            text: format!("Error: Could not refine text. Both APIs failed:\n{}", details),
            source: RefinementSource::Fallback,
            error: Some(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behaviour {
        Unconfigured,
        Fails,
        Empty,
        Answers(&'static str),
    }

    struct MockProvider {
        source: RefinementSource,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    impl RefinementProvider for MockProvider {
        fn source(&self) -> RefinementSource {
            self.source
        }

        fn attempt(&self, _raw_text: &str, _image: Option<&Path>) -> Result<String, RefineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Unconfigured => Err(RefineError::NotConfigured("Mock")),
                Behaviour::Fails => Err(RefineError::Api {
                    status: 503,
                    body: "overloaded".to_string(),
                }),
                Behaviour::Empty => Ok("  \n".to_string()),
                Behaviour::Answers(text) => Ok(text.to_string()),
            }
        }
    }

    fn mock(source: RefinementSource, behaviour: Behaviour) -> (Box<dyn RefinementProvider + Send + Sync>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = MockProvider {
            source,
            behaviour,
            calls: calls.clone(),
        };
        (Box::new(provider), calls)
    }

    #[test]
    fn test_unconfigured_first_provider_falls_through() {
        let (gemini, _) = mock(RefinementSource::Gemini, Behaviour::Unconfigured);
        let (openai, openai_calls) = mock(RefinementSource::OpenAi, Behaviour::Answers("Report"));
        let chain = RefinementChain::new(vec![gemini, openai]);

        let result = chain.refine("Paracetmol 500mg", None);
        assert_eq!(result.text, "Report");
        assert_eq!(result.source, RefinementSource::OpenAi);
        assert!(result.error.is_none());
        assert_eq!(openai_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_success_stops_chain() {
        let (gemini, _) = mock(RefinementSource::Gemini, Behaviour::Answers("From Gemini"));
        let (openai, openai_calls) = mock(RefinementSource::OpenAi, Behaviour::Answers("From OpenAI"));
        let chain = RefinementChain::new(vec![gemini, openai]);

        assert_eq!(chain.refine("text", None).source, RefinementSource::Gemini);
        assert_eq!(openai_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_answer_counts_as_failure() {
        let (gemini, _) = mock(RefinementSource::Gemini, Behaviour::Empty);
        let (openai, _) = mock(RefinementSource::OpenAi, Behaviour::Answers("ok"));
        let chain = RefinementChain::new(vec![gemini, openai]);
        assert_eq!(chain.refine("text", None).source, RefinementSource::OpenAi);
    }

    #[test]
    fn test_fallback_bullets() {
        let (gemini, _) = mock(RefinementSource::Gemini, Behaviour::Fails);
        let (openai, _) = mock(RefinementSource::OpenAi, Behaviour::Unconfigured);
        let chain = RefinementChain::new(vec![gemini, openai]);

        let result = chain.refine("Paracetamol 500mg\nab\n  Take twice daily  \n", None);
        assert_eq!(
            result.text,
            "[Fallback: APIs unavailable]\n\n• Paracetamol 500mg\n\n• Take twice daily"
        );
        assert_eq!(result.source, RefinementSource::Fallback);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_terminal_error_when_cleanup_is_empty() {
        let (gemini, _) = mock(RefinementSource::Gemini, Behaviour::Fails);
        let (openai, _) = mock(RefinementSource::OpenAi, Behaviour::Unconfigured);
        let chain = RefinementChain::new(vec![gemini, openai]);

        let result = chain.refine("ab\ncd", None);
        assert!(result.text.starts_with("Error: Could not refine text. Both APIs failed:\n"));
        assert!(result.text.contains("Gemini: API returned 503: overloaded"));
        assert!(result.text.contains("OpenAI: Mock API key not configured"));
        assert!(result.error.is_some());
    }

    #[test]
    fn test_simple_cleanup() {
        assert_eq!(simple_cleanup(""), "");
        assert_eq!(simple_cleanup("abc\n\n  \n"), "");
        assert_eq!(simple_cleanup("abcd"), "• abcd");
    }

    #[test]
    fn test_auth_failures() {
        let api = |status| RefineError::Api {
            status,
            body: String::new(),
        };
        assert!(api(401).is_auth_failure());
        assert!(api(403).is_auth_failure());
        assert!(!api(404).is_auth_failure());
        assert!(!RefineError::EmptyResponse.is_auth_failure());
    }

    #[test]
    fn test_placeholder_keys() {
        assert!(is_placeholder_key(None));
        assert!(is_placeholder_key(Some("  ")));
        assert!(is_placeholder_key(Some("your_gemini_api_key_here")));
        assert!(is_placeholder_key(Some("your_openai_api_key_here")));
        assert!(!is_placeholder_key(Some("sk-live-123")));
    }

    #[test]
    fn test_source_serializes_lowercase() {
        assert_eq!(serde_json::to_value(RefinementSource::OpenAi).unwrap(), "openai");
    }
}
