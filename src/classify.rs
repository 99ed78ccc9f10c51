//! Batched LLM classification of keywords into ad groups.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use indicatif::ProgressBar;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dataset::{Competition, KeywordDataset, KeywordRecord, RecordId};
use crate::error::{AnalysisError, AnalysisResult};
use crate::extraction::retry::StructuredCaller;

pub const DEFAULT_BATCH_SIZE: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    BroadMatchModifier,
    PhraseMatch,
    ExactMatch,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::BroadMatchModifier => "Broad Match Modifier",
            MatchType::PhraseMatch => "Phrase Match",
            MatchType::ExactMatch => "Exact Match",
        }
    }

    /// Accepts the canonical names and the usual shorthands ("BMM", "phrase").
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let norm = raw.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        if norm == "bmm" || norm.contains("broad") {
            Some(MatchType::BroadMatchModifier)
        } else if norm.contains("phrase") {
            Some(MatchType::PhraseMatch)
        } else if norm.contains("exact") {
            Some(MatchType::ExactMatch)
        } else {
            None
        }
    }

    /// Word-count rule: one word broad, two words phrase, longer exact.
    pub fn for_keyword(keyword: &str) -> Self {
        match keyword.split_whitespace().count() {
            0 | 1 => MatchType::BroadMatchModifier,
            2 => MatchType::PhraseMatch,
            _ => MatchType::ExactMatch,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationAnnotation {
    pub ad_group: String,
    pub intent: String,
    pub match_type: MatchType,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassificationOutcome<'a> {
    Classified(&'a ClassificationAnnotation),
    Unclassified,
}

#[derive(Debug, Clone, Copy)]
pub struct AnnotatedKeyword<'a> {
    pub record: &'a KeywordRecord,
    pub annotation: &'a ClassificationAnnotation,
}

/// Classified keywords by ad group name, plus whatever the model skipped.
#[derive(Debug, Default)]
pub struct AdGroups<'a> {
    pub groups: BTreeMap<String, Vec<AnnotatedKeyword<'a>>>,
    pub unclassified: Vec<&'a KeywordRecord>,
}

impl AdGroups<'_> {
    pub fn keyword_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Default)]
pub struct Classification {
    annotations: HashMap<RecordId, ClassificationAnnotation>,
}

impl Classification {
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn get(&self, id: RecordId) -> Option<&ClassificationAnnotation> {
        self.annotations.get(&id)
    }

    pub fn outcome(&self, id: RecordId) -> ClassificationOutcome<'_> {
        match self.get(id) {
            Some(a) => ClassificationOutcome::Classified(a),
            None => ClassificationOutcome::Unclassified,
        }
    }

    /// Rebuilt from scratch on every call, in dataset order within a group.
    pub fn ad_groups<'a>(&'a self, dataset: &'a KeywordDataset) -> AdGroups<'a> {
        let mut out = AdGroups::default();
        for record in dataset.iter() {
            match self.outcome(record.id) {
                ClassificationOutcome::Classified(annotation) => out
                    .groups
                    .entry(annotation.ad_group.clone())
                    .or_default()
                    .push(AnnotatedKeyword { record, annotation }),
                ClassificationOutcome::Unclassified => out.unclassified.push(record),
            }
        }
        out
    }
}

#[derive(Serialize)]
struct PromptRecord<'a> {
    id: RecordId,
    keyword: &'a str,
    search_volume: u64,
    competition: Competition,
}

pub struct Classifier<'a> {
    caller: StructuredCaller<'a>,
    brand_name: String,
    competitor_name: String,
    batch_size: usize,
    progress: ProgressBar,
}

impl<'a> Classifier<'a> {
    pub fn new(caller: StructuredCaller<'a>, brand_name: &str, competitor_name: &str) -> Self {
        Classifier {
            caller,
            brand_name: brand_name.to_string(),
            competitor_name: competitor_name.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Classify every record, one sequential model call per batch. Any batch
    /// failure aborts the whole classification.
    pub fn classify(&self, records: &[KeywordRecord]) -> AnalysisResult<Classification> {
        let batches = records.chunks(self.batch_size);
        self.progress.set_length(batches.len() as u64);

        let mut out = Classification::default();
        for (n, batch) in batches.enumerate() {
            let prompt = build_prompt(batch, &self.brand_name, &self.competitor_name)?;
            let labels = self
                .caller
                .array_with(&prompt, |items| Ok(parse_labels(items, batch)))?;

            debug!(batch = n + 1, records = batch.len(), labelled = labels.len(), "Batch classified");
            for (id, annotation) in labels {
                out.annotations.entry(id).or_insert(annotation);
            }
            self.progress.inc(1);
        }
        self.progress.finish_and_clear();

        info!(
            classified = out.len(),
            unclassified = records.len() - out.len(),
            "Classification complete"
        );
        Ok(out)
    }
}

fn build_prompt(batch: &[KeywordRecord], brand: &str, competitor: &str) -> AnalysisResult<String> {
    let rows: Vec<PromptRecord> = batch
        .iter()
        .map(|r| PromptRecord {
            id: r.id,
            keyword: &r.keyword,
            search_volume: r.search_volume,
            competition: r.competition,
        })
        .collect();
    let rows = serde_json::to_string_pretty(&rows)
        .map_err(|e| AnalysisError::UnexpectedShape(format!("cannot encode batch: {}", e)))?;

    Ok(format!(
        r#"You are an SEM expert. Classify each keyword record for campaign structuring.
Brand: {brand}
Competitor: {competitor}
Records:
{rows}
Return ONLY a JSON array of objects, one per record, reusing each record's id:
[
  {{"id": <id>, "ad_group": "<group>", "intent": "<intent>", "match_type": "<Broad Match Modifier|Phrase Match|Exact Match>", "reasoning": "<brief>"}}
]
"#
    ))
}

fn item_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_field(item: &serde_json::Map<String, Value>, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Map model items back onto the batch. Ids outside the batch, items
/// without an id and items without an ad group are dropped; the first item
/// for an id wins.
fn parse_labels(items: Vec<Value>, batch: &[KeywordRecord]) -> Vec<(RecordId, ClassificationAnnotation)> {
    let by_id: HashMap<RecordId, &KeywordRecord> = batch.iter().map(|r| (r.id, r)).collect();
    let mut seen = HashSet::new();
    let mut labels = Vec::new();

    for item in items {
        let Value::Object(item) = item else {
            continue;
        };
        let Some(raw_id) = item.get("id").and_then(item_id) else {
            continue;
        };
        let id = RecordId(raw_id);
        let Some(record) = by_id.get(&id) else {
            warn!(error = %AnalysisError::UnknownRecordId(raw_id), "Dropping label");
            continue;
        };
        if !seen.insert(id) {
            debug!(id = raw_id, "Duplicate label ignored");
            continue;
        }

        let ad_group = text_field(&item, "ad_group");
        if ad_group.is_empty() {
            debug!(id = raw_id, keyword = %record.keyword, "No ad group returned");
            continue;
        }
        let match_type = item
            .get("match_type")
            .and_then(Value::as_str)
            .and_then(MatchType::parse_lenient)
            .unwrap_or_else(|| MatchType::for_keyword(&record.keyword));

        labels.push((
            id,
            ClassificationAnnotation {
                ad_group,
                intent: text_field(&item, "intent"),
                match_type,
                reasoning: text_field(&item, "reasoning"),
            },
        ));
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::RetryPolicy;
    use crate::llm::stub::ScriptedModel;
    use std::path::Path;
    use std::time::Duration;

    fn fixture() -> KeywordDataset {
        KeywordDataset::load(Path::new("tests/fixtures/keywords.csv")).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::ZERO,
        }
    }

    #[test]
    fn match_type_parsing() {
        assert_eq!(MatchType::parse_lenient("Phrase Match"), Some(MatchType::PhraseMatch));
        assert_eq!(MatchType::parse_lenient("BMM"), Some(MatchType::BroadMatchModifier));
        assert_eq!(MatchType::parse_lenient("broad_match"), Some(MatchType::BroadMatchModifier));
        assert_eq!(MatchType::parse_lenient(" EXACT "), Some(MatchType::ExactMatch));
        assert_eq!(MatchType::parse_lenient("modified"), None);
    }

    #[test]
    fn word_count_fallback() {
        assert_eq!(MatchType::for_keyword("shoes"), MatchType::BroadMatchModifier);
        assert_eq!(MatchType::for_keyword("running shoes"), MatchType::PhraseMatch);
        assert_eq!(MatchType::for_keyword("buy running shoes online"), MatchType::ExactMatch);
    }

    #[test]
    fn fixture_response_merges_by_id() {
        let ds = fixture();
        let reply = std::fs::read_to_string("tests/fixtures/classify_response.txt").unwrap();
        let model = ScriptedModel::new(vec![Ok(reply)]);
        let classifier = Classifier::new(StructuredCaller::new(&model, policy()), "Stride", "Rival");

        let result = classifier.classify(ds.records()).unwrap();
        assert_eq!(model.calls.get(), 1);
        assert_eq!(result.len(), 10);

        let first = result.get(RecordId(0)).unwrap();
        assert_eq!(first.ad_group, "Running Shoes");
        assert_eq!(first.match_type, MatchType::PhraseMatch);

        assert_eq!(result.get(RecordId(2)).unwrap().match_type, MatchType::BroadMatchModifier);
        assert_eq!(result.get(RecordId(3)).unwrap().intent, "Transactional");
        // "best walking shoes for women" has no match type in the reply
        assert_eq!(result.get(RecordId(8)).unwrap().match_type, MatchType::ExactMatch);

        assert_eq!(result.outcome(RecordId(5)), ClassificationOutcome::Unclassified);
        assert_eq!(result.outcome(RecordId(7)), ClassificationOutcome::Unclassified);
        assert!(result.get(RecordId(99)).is_none());
    }

    #[test]
    fn ad_groups_never_invent_a_default_bucket() {
        let ds = fixture();
        let reply = std::fs::read_to_string("tests/fixtures/classify_response.txt").unwrap();
        let model = ScriptedModel::new(vec![Ok(reply)]);
        let classifier = Classifier::new(StructuredCaller::new(&model, policy()), "Stride", "Rival");
        let result = classifier.classify(ds.records()).unwrap();

        let groups = result.ad_groups(&ds);
        let names: Vec<&str> = groups.groups.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["Comfort", "Deals", "Generic Footwear", "Hiking", "Running Shoes", "Walking"]
        );
        assert_eq!(groups.groups["Running Shoes"].len(), 4);
        assert_eq!(groups.keyword_count(), 10);

        let skipped: Vec<&str> = groups.unclassified.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(skipped, vec!["kids sneakers", "nike pegasus"]);
    }

    #[test]
    fn batches_are_sequential_and_scoped() {
        let ds = fixture();
        let model = ScriptedModel::ok(&[
            r#"[{"id": 0, "ad_group": "A", "intent": "i", "match_type": "Exact Match", "reasoning": ""}]"#,
            r#"[{"id": 5, "ad_group": "B", "intent": "i", "match_type": "Exact Match", "reasoning": ""},
                {"id": 0, "ad_group": "Stolen", "intent": "i", "match_type": "Exact Match", "reasoning": ""}]"#,
            r#"[{"id": 11, "ad_group": "C", "intent": "i", "match_type": "Exact Match", "reasoning": ""}]"#,
        ]);
        let classifier = Classifier::new(StructuredCaller::new(&model, policy()), "Stride", "Rival")
            .with_batch_size(5);

        let result = classifier.classify(ds.records()).unwrap();
        assert_eq!(model.calls.get(), 3);
        assert_eq!(result.len(), 3);
        // id 0 belongs to the first batch; the second batch cannot relabel it
        assert_eq!(result.get(RecordId(0)).unwrap().ad_group, "A");

        let prompts = model.prompts.borrow();
        assert!(prompts[0].contains("\"running shoes\""));
        assert!(!prompts[0].contains("\"orthopedic shoes\""));
        assert!(prompts[2].contains("\"orthopedic shoes\""));
        assert!(prompts[0].contains("Brand: Stride"));
        assert!(prompts[0].contains("Competitor: Rival"));
    }

    #[test]
    fn failed_batch_aborts_everything() {
        let ds = fixture();
        let model = ScriptedModel::ok(&[
            r#"[{"id": 0, "ad_group": "A", "intent": "i", "match_type": "Exact Match", "reasoning": ""}]"#,
            "sorry",
            "still sorry",
            "no",
        ]);
        let classifier = Classifier::new(StructuredCaller::new(&model, policy()), "Stride", "Rival")
            .with_batch_size(6);

        let err = classifier.classify(ds.records()).unwrap_err();
        assert!(matches!(err, AnalysisError::NoStructuredData(_)));
        assert_eq!(model.calls.get(), 4);
    }
}
