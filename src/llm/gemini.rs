//! Blocking client for the Gemini `generateContent` endpoint.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LlmError, TextGenerator};
use crate::config::LlmSettings;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const PLACEHOLDER_KEY: &str = "your-gemini-api-key-here";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u32>,
    #[serde(default)]
    candidates_token_count: Option<u32>,
}

/// Handle bound to one resolved model.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{}{}?key={}", self.base_url, self.model, suffix, self.api_key)
    }

    fn redacted(&self, url: &str) -> String {
        url.replace(&self.api_key, "***")
    }

    /// Ask the API whether this model id exists for our key.
    fn probe(&self) -> Result<(), LlmError> {
        let url = self.endpoint("");
        debug!("Probing model: {}", self.redacted(&url));
        let response = self.client.get(&url).send().map_err(|e| e.without_url())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(LlmError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            })
        }
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let url = self.endpoint(":generateContent");
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Sending generateContent");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| e.without_url())?;
        let status = response.status();
        let text = response.text().map_err(|e| e.without_url())?;

        if !status.is_success() {
            warn!(model = %self.model, status = status.as_u16(), "Gemini request failed");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        response_text(&text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(raw: &str) -> Result<String, LlmError> {
    let parsed: GenerateResponse = serde_json::from_str(raw)?;

    if let Some(usage) = &parsed.usage_metadata {
        debug!(
            prompt_tokens = ?usage.prompt_token_count,
            response_tokens = ?usage.candidates_token_count,
            "Gemini usage"
        );
    }

    let candidate = parsed
        .candidates
        .first()
        .ok_or_else(|| LlmError::EmptyResponse("no candidates".into()))?;

    let text: String = candidate
        .content
        .as_ref()
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
        return Err(LlmError::EmptyResponse(format!("finish reason {}", reason)));
    }
    Ok(text)
}

/// Validate the key and pick the first model in the preference list that
/// the API acknowledges. Runs once at start-up.
pub fn resolve_model(settings: &LlmSettings, api_key: &str) -> Result<GeminiClient, LlmError> {
    let api_key = api_key.trim();
    if api_key.is_empty() || api_key == PLACEHOLDER_KEY {
        return Err(LlmError::MissingApiKey);
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(settings.timeout_seconds))
        .build()?;

    let model = first_available(&settings.models, |model| {
        GeminiClient {
            client: client.clone(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: BASE_URL.to_string(),
        }
        .probe()
    })?;
    info!(model = %model, "Resolved Gemini model");
    Ok(GeminiClient {
        client,
        api_key: api_key.to_string(),
        model,
        base_url: BASE_URL.to_string(),
    })
}

/// First model whose probe succeeds. A rate limit ends the search.
fn first_available(
    models: &[String],
    mut probe: impl FnMut(&str) -> Result<(), LlmError>,
) -> Result<String, LlmError> {
    for model in models {
        match probe(model) {
            Ok(()) => return Ok(model.clone()),
            Err(e) if e.is_rate_limited() => {
                warn!(model = %model, "Rate limited while probing models");
                return Err(e);
            }
            Err(e) => warn!(model = %model, error = %e, "Model unavailable, trying next"),
        }
    }
    Err(LlmError::NoUsableModel(models.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_candidate_parts() {
        let raw = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "```json\n{\"a\":"}, {"text": " 1}\n```"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 8}
        }"#;
        assert_eq!(response_text(raw).unwrap(), "```json\n{\"a\": 1}\n```");
    }

    #[test]
    fn no_candidates_is_empty_response() {
        let err = response_text(r#"{"candidates": []}"#).unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse(_)));
    }

    #[test]
    fn blocked_candidate_reports_finish_reason() {
        let raw = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let err = response_text(raw).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    fn models() -> Vec<String> {
        vec!["gemini-2.0-flash".into(), "gemini-1.5-flash".into(), "gemini-pro".into()]
    }

    #[test]
    fn skips_unavailable_models() {
        let mut probed = Vec::new();
        let model = first_available(&models(), |m| {
            probed.push(m.to_string());
            if m == "gemini-1.5-flash" {
                Ok(())
            } else {
                Err(LlmError::Status { status: 404, body: "not found".into() })
            }
        })
        .unwrap();
        assert_eq!(model, "gemini-1.5-flash");
        assert_eq!(probed, vec!["gemini-2.0-flash", "gemini-1.5-flash"]);
    }

    #[test]
    fn rate_limit_stops_model_search() {
        let mut calls = 0;
        let err = first_available(&models(), |_| {
            calls += 1;
            Err(LlmError::Status { status: 429, body: "RESOURCE_EXHAUSTED".into() })
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(err.is_rate_limited());
        assert!(!matches!(err, LlmError::NoUsableModel(_)));
    }

    #[test]
    fn all_unavailable_is_no_usable_model() {
        let err = first_available(&models(), |_| {
            Err(LlmError::Status { status: 404, body: "not found".into() })
        })
        .unwrap_err();
        assert!(matches!(err, LlmError::NoUsableModel(ref m) if m.len() == 3));
    }

    #[test]
    fn placeholder_key_is_rejected_before_any_request() {
        let settings = LlmSettings::default();
        let err = resolve_model(&settings, PLACEHOLDER_KEY).unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
        assert!(matches!(resolve_model(&settings, "  ").unwrap_err(), LlmError::MissingApiKey));
    }
}
