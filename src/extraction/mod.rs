//! Pull a JSON value out of free-form model text.
//!
//! Strategies, in order: fences tagged `json`, any fence, then the span from
//! the first opening to the last closing delimiter. A candidate that does not
//! parse, or parses to the wrong shape, falls through to the next one.

pub mod retry;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{AnalysisError, AnalysisResult};

pub use retry::RetryPolicy;

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```[ \t]*json[ \t]*\r?\n?(.*?)```").unwrap());
static ANY_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    Array,
}

impl Shape {
    fn delimiters(self) -> (char, char) {
        match self {
            Shape::Object => ('{', '}'),
            Shape::Array => ('[', ']'),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Object => f.write_str("object"),
            Shape::Array => f.write_str("array"),
        }
    }
}

fn bracketed(text: &str, shape: Shape) -> Option<&str> {
    let (open, close) = shape.delimiters();
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn first_candidate<T>(
    text: &str,
    shape: Shape,
    pick: impl Fn(Value) -> Option<T>,
) -> AnalysisResult<T> {
    if text.trim().is_empty() {
        return Err(AnalysisError::NoStructuredData("empty response".into()));
    }

    let tagged = JSON_FENCE_RE.captures_iter(text).filter_map(|c| c.get(1));
    let any = ANY_FENCE_RE.captures_iter(text).filter_map(|c| c.get(1));
    let mut candidates = tagged
        .chain(any)
        .map(|m| m.as_str())
        .chain(bracketed(text, shape));

    candidates
        .find_map(|c| serde_json::from_str::<Value>(c.trim()).ok().and_then(&pick))
        .ok_or_else(|| AnalysisError::NoStructuredData(format!("no JSON {} found", shape)))
}

pub fn extract_json_object(text: &str) -> AnalysisResult<Map<String, Value>> {
    first_candidate(text, Shape::Object, |v| match v {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

pub fn extract_json_array(text: &str) -> AnalysisResult<Vec<Value>> {
    first_candidate(text, Shape::Array, |v| match v {
        Value::Array(items) => Some(items),
        _ => None,
    })
}
