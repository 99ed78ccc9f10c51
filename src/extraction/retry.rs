use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{extract_json_array, extract_json_object, Shape};
use crate::config::LlmSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::llm::TextGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Rate-limited attempt `n` (1-based) sleeps `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        RetryPolicy {
            max_retries: settings.max_retries,
            backoff_step: Duration::from_secs(settings.backoff_seconds),
        }
    }

    /// Delay after the zero-based `attempt` failed on a rate limit.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * (attempt + 1)
    }
}

/// Prompt for the zero-based `attempt`. Retries carry one extra instruction
/// asking for bare minified JSON of the expected shape.
pub fn augment_prompt(original: &str, attempt: u32, shape: Shape) -> String {
    if attempt == 0 {
        return original.to_string();
    }
    format!(
        "{}\n\nReturn ONLY valid minified JSON {} with no code fences and no extra text.",
        original.trim_end(),
        shape
    )
}

/// Generate, parse, and retry on any failure. Rate-limited failures back off
/// linearly before the next attempt. The last error is returned once the
/// retries are spent; a rate limit surfaces as `RateLimited`.
pub fn call_with_retry<G, T, F>(
    model: &G,
    prompt: &str,
    shape: Shape,
    policy: &RetryPolicy,
    parse: F,
) -> AnalysisResult<T>
where
    G: TextGenerator + ?Sized,
    F: Fn(&str) -> AnalysisResult<T>,
{
    let attempts = policy.max_retries + 1;
    let mut last_err = None;

    for attempt in 0..attempts {
        let prompt = augment_prompt(prompt, attempt, shape);
        debug!(model = model.model(), attempt = attempt + 1, "Structured call");

        let outcome = model
            .generate(&prompt)
            .map_err(AnalysisError::from)
            .and_then(|text| parse(&text));

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt = attempt + 1, "Structured call recovered");
                }
                return Ok(value);
            }
            Err(e) => {
                let limited = e.is_rate_limited();
                warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    rate_limited = limited,
                    error = %e,
                    "Structured call failed"
                );
                if limited && attempt + 1 < attempts {
                    let delay = policy.backoff(attempt);
                    warn!("Rate limited, backing off {:.1}s", delay.as_secs_f64());
                    thread::sleep(delay);
                }
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) if e.is_rate_limited() => Err(AnalysisError::RateLimited {
            attempts,
            message: e.to_string(),
        }),
        Some(e) => Err(e),
        None => Err(AnalysisError::NoStructuredData("no attempt was made".into())),
    }
}

/// A model handle paired with a retry policy.
pub struct StructuredCaller<'a> {
    model: &'a dyn TextGenerator,
    policy: RetryPolicy,
}

impl<'a> StructuredCaller<'a> {
    pub fn new(model: &'a dyn TextGenerator, policy: RetryPolicy) -> Self {
        StructuredCaller { model, policy }
    }

    /// JSON object, checked by `validate` inside the retry loop.
    pub fn object_with<T>(
        &self,
        prompt: &str,
        validate: impl Fn(Map<String, Value>) -> AnalysisResult<T>,
    ) -> AnalysisResult<T> {
        call_with_retry(self.model, prompt, Shape::Object, &self.policy, |text| {
            validate(extract_json_object(text)?)
        })
    }

    /// JSON array, checked by `validate` inside the retry loop.
    pub fn array_with<T>(
        &self,
        prompt: &str,
        validate: impl Fn(Vec<Value>) -> AnalysisResult<T>,
    ) -> AnalysisResult<T> {
        call_with_retry(self.model, prompt, Shape::Array, &self.policy, |text| {
            validate(extract_json_array(text)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::stub::ScriptedModel;
    use crate::llm::LlmError;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::ZERO,
        }
    }

    #[test]
    fn linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(10));
        assert_eq!(policy.backoff(1), Duration::from_secs(20));
        assert_eq!(policy.backoff(2), Duration::from_secs(30));
    }

    #[test]
    fn augment_is_pure_and_not_stacked() {
        assert_eq!(augment_prompt("classify", 0, Shape::Array), "classify");
        let second = augment_prompt("classify", 1, Shape::Array);
        let third = augment_prompt("classify", 2, Shape::Array);
        assert_eq!(second, third);
        assert!(second.starts_with("classify\n\n"));
        assert!(second.contains("minified JSON array"));
        assert_eq!(second.matches("Return ONLY").count(), 1);
    }

    #[test]
    fn recovers_after_two_rate_limits() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::rate_limited(),
            ScriptedModel::rate_limited(),
            Ok("```json\n{\"ok\": true}\n```".to_string()),
        ]);
        let value = call_with_retry(&model, "p", Shape::Object, &instant(), |t| {
            extract_json_object(t)
        })
        .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(model.calls.get(), 3);

        let prompts = model.prompts.borrow();
        assert_eq!(prompts[0], "p");
        assert!(prompts[1].contains("no code fences"));
        assert!(prompts[2].contains("no code fences"));
    }

    #[test]
    fn exhausted_rate_limit_is_reported_as_such() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::rate_limited(),
            ScriptedModel::rate_limited(),
            ScriptedModel::rate_limited(),
            Ok("{}".into()),
        ]);
        let err = call_with_retry(&model, "p", Shape::Object, &instant(), |t| {
            extract_json_object(t)
        })
        .unwrap_err();
        assert!(matches!(err, AnalysisError::RateLimited { attempts: 3, .. }));
        assert_eq!(model.calls.get(), 3);
    }

    #[test]
    fn unparseable_text_is_retried_then_reraised() {
        let model = ScriptedModel::ok(&["no json here", "still prose", "nope"]);
        let err = call_with_retry(&model, "p", Shape::Array, &instant(), |t| {
            extract_json_array(t)
        })
        .unwrap_err();
        assert!(matches!(err, AnalysisError::NoStructuredData(_)));
        assert_eq!(model.calls.get(), 3);
    }

    #[test]
    fn transport_error_without_rate_limit_keeps_its_kind() {
        let model = ScriptedModel::new(vec![Err(LlmError::Status {
            status: 500,
            body: "backend error".into(),
        })]);
        let policy = RetryPolicy {
            max_retries: 0,
            backoff_step: Duration::ZERO,
        };
        let err = call_with_retry(&model, "p", Shape::Object, &policy, |t| {
            extract_json_object(t)
        })
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Generation(LlmError::Status { status: 500, .. })));
        assert_eq!(model.calls.get(), 1);
    }

    #[test]
    fn validation_failure_is_retried() {
        let model = ScriptedModel::ok(&["{\"wrong\": 1}", "{\"right\": 2}"]);
        let caller = StructuredCaller::new(&model, instant());
        let got = caller
            .object_with("p", |obj| {
                obj.get("right")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| AnalysisError::UnexpectedShape("missing `right`".into()))
            })
            .unwrap();
        assert_eq!(got, 2);
        assert_eq!(model.calls.get(), 2);
    }
}
