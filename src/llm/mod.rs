pub mod gemini;

use thiserror::Error;

pub use gemini::resolve_model;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode model response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("model returned no text: {0}")]
    EmptyResponse(String),

    #[error("no usable model among [{}]", .0.join(", "))]
    NoUsableModel(Vec<String>),

    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
}

impl LlmError {
    /// HTTP 429 or any message mentioning a quota.
    pub fn is_rate_limited(&self) -> bool {
        if let LlmError::Status { status: 429, .. } = self {
            return true;
        }
        let msg = self.to_string();
        msg.contains("429") || msg.to_lowercase().contains("quota")
    }
}

/// A single synchronous prompt → text call.
pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Model identifier, for logs.
    fn model(&self) -> &str {
        "unknown"
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        (**self).generate(prompt)
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_message_counts_as_rate_limit() {
        let err = LlmError::Status {
            status: 403,
            body: "Quota exceeded for project".into(),
        };
        assert!(err.is_rate_limited());
    }

    #[test]
    fn server_error_is_not_rate_limit() {
        let err = LlmError::Status {
            status: 500,
            body: "internal".into(),
        };
        assert!(!err.is_rate_limited());
        assert!(!LlmError::EmptyResponse("no candidates".into()).is_rate_limited());
    }
}
