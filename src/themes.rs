//! Performance Max theme generation.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::info;

use crate::dataset::KeywordRecord;
use crate::error::{AnalysisError, AnalysisResult};
use crate::extraction::retry::StructuredCaller;

pub const THEMES_PER_CATEGORY: usize = 5;
pub const DEFAULT_TOP_N: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThemeCategory {
    ProductCategory,
    UseCaseBased,
    Demographic,
    SeasonalEventBased,
}

impl ThemeCategory {
    pub const ALL: [ThemeCategory; 4] = [
        ThemeCategory::ProductCategory,
        ThemeCategory::UseCaseBased,
        ThemeCategory::Demographic,
        ThemeCategory::SeasonalEventBased,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ThemeCategory::ProductCategory => "Product Category",
            ThemeCategory::UseCaseBased => "Use-case Based",
            ThemeCategory::Demographic => "Demographic",
            ThemeCategory::SeasonalEventBased => "Seasonal/Event-Based",
        }
    }

    /// Key the model is asked to use.
    pub fn json_key(&self) -> String {
        format!("{} Themes", self.label())
    }

    fn matches_key(&self, key: &str) -> bool {
        let key = key.trim().to_lowercase();
        let key = key.strip_suffix(" themes").unwrap_or(key.as_str());
        key == self.label().to_lowercase()
    }
}

impl fmt::Display for ThemeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThemeSet {
    themes: BTreeMap<ThemeCategory, Vec<String>>,
}

impl ThemeSet {
    /// Every category must be present with at least one string theme.
    /// Non-string entries are skipped; lists are cut to five.
    pub fn from_json(obj: Map<String, Value>) -> AnalysisResult<Self> {
        let mut themes = BTreeMap::new();
        for category in ThemeCategory::ALL {
            let values = obj
                .iter()
                .find(|(k, _)| category.matches_key(k))
                .and_then(|(_, v)| v.as_array())
                .ok_or_else(|| {
                    AnalysisError::UnexpectedShape(format!("missing theme list `{}`", category.json_key()))
                })?;
            let list: Vec<String> = values
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(THEMES_PER_CATEGORY)
                .collect();
            if list.is_empty() {
                return Err(AnalysisError::UnexpectedShape(format!(
                    "no themes for `{}`",
                    category.json_key()
                )));
            }
            themes.insert(category, list);
        }
        Ok(ThemeSet { themes })
    }

    pub fn get(&self, category: ThemeCategory) -> &[String] {
        self.themes.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    /// `(category, theme)` pairs in category order.
    pub fn iter(&self) -> impl Iterator<Item = (ThemeCategory, &str)> + '_ {
        ThemeCategory::ALL
            .into_iter()
            .flat_map(move |c| self.get(c).iter().map(move |t| (c, t.as_str())))
    }

    pub fn len(&self) -> usize {
        self.themes.values().map(Vec::len).sum()
    }
}

fn build_prompt(top: &[KeywordRecord], brand: &str, competitor: &str) -> String {
    let keywords: Vec<String> = top
        .iter()
        .map(|r| format!("- {} (volume {}, competition {})", r.keyword, r.search_volume, r.competition))
        .collect();
    let keys: Vec<String> = ThemeCategory::ALL.iter().map(|c| format!("\"{}\"", c.json_key())).collect();
    format!(
        "Generate Performance Max campaign themes for {brand} (main competitor: {competitor}).\n\
         Top keywords:\n{keywords}\n\
         Return a JSON object with exactly these keys: {keys}.\n\
         Each value is a list of {n} short theme strings.",
        keywords = keywords.join("\n"),
        keys = keys.join(", "),
        n = THEMES_PER_CATEGORY,
    )
}

/// One structured call over the given top keywords. Selecting the slice is
/// the caller's job.
pub fn generate_themes(
    caller: &StructuredCaller<'_>,
    top: &[KeywordRecord],
    brand: &str,
    competitor: &str,
) -> AnalysisResult<ThemeSet> {
    let prompt = build_prompt(top, brand, competitor);
    let set = caller.object_with(&prompt, ThemeSet::from_json)?;
    info!(keywords = top.len(), themes = set.len(), "Themes generated");
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::KeywordDataset;
    use crate::extraction::RetryPolicy;
    use crate::llm::stub::ScriptedModel;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::ZERO,
        }
    }

    #[test]
    fn fixture_response() {
        let ds = KeywordDataset::load(Path::new("tests/fixtures/keywords.csv")).unwrap();
        let reply = std::fs::read_to_string("tests/fixtures/themes_response.md").unwrap();
        let model = ScriptedModel::new(vec![Ok(reply)]);
        let caller = StructuredCaller::new(&model, policy());

        let set = generate_themes(&caller, ds.head(DEFAULT_TOP_N), "Stride", "Rival").unwrap();
        assert_eq!(set.len(), 20);
        assert_eq!(set.get(ThemeCategory::ProductCategory)[0], "Running Shoes");
        assert_eq!(set.get(ThemeCategory::SeasonalEventBased)[2], "Black Friday Deals");

        let order: Vec<ThemeCategory> = set.iter().map(|(c, _)| c).step_by(5).collect();
        assert_eq!(order, ThemeCategory::ALL.to_vec());

        let prompt = &model.prompts.borrow()[0];
        assert!(prompt.contains("\"Use-case Based Themes\""));
        assert!(prompt.contains("- orthopedic shoes (volume 2400, competition Low)"));
        assert!(prompt.contains("- running shoes (volume 12000, competition High)"));
    }

    #[test]
    fn keys_are_matched_loosely() {
        let obj = json!({
            "product category": ["a"],
            "USE-CASE BASED THEMES": ["b", 3, "c"],
            "Demographic": ["d", "e", "f", "g", "h", "i", "j"],
            "Seasonal/Event-Based Themes": ["k"],
        });
        let Value::Object(obj) = obj else { unreachable!() };
        let set = ThemeSet::from_json(obj).unwrap();
        assert_eq!(set.get(ThemeCategory::UseCaseBased), ["b", "c"]);
        assert_eq!(set.get(ThemeCategory::Demographic).len(), 5);
    }

    #[test]
    fn missing_category_is_retried() {
        let partial = r#"{"Product Category Themes": ["a"], "Demographic Themes": ["b"]}"#;
        let full = r#"{"Product Category Themes": ["a"], "Use-case Based Themes": ["b"],
                       "Demographic Themes": ["c"], "Seasonal/Event-Based Themes": ["d"]}"#;
        let model = ScriptedModel::ok(&[partial, full]);
        let caller = StructuredCaller::new(&model, policy());

        let set = generate_themes(&caller, &[], "Stride", "Rival").unwrap();
        assert_eq!(model.calls.get(), 2);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn persistent_bad_shape_surfaces() {
        let model = ScriptedModel::ok(&["{}", "{}", "{}"]);
        let caller = StructuredCaller::new(&model, policy());
        let err = generate_themes(&caller, &[], "Stride", "Rival").unwrap_err();
        assert!(matches!(err, AnalysisError::UnexpectedShape(_)));
    }
}
