use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AnalysisError, AnalysisResult};

/// Stable row identifier, assigned once when the dataset is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Competition {
    Low,
    Medium,
    High,
}

impl Competition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Competition::Low => "Low",
            Competition::Medium => "Medium",
            Competition::High => "High",
        }
    }
}

impl fmt::Display for Competition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Competition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Competition::Low),
            "medium" | "med" => Ok(Competition::Medium),
            "high" => Ok(Competition::High),
            other => Err(format!("unknown competition tier {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordRecord {
    pub id: RecordId,
    pub keyword: String,
    pub search_volume: u64,
    pub bid_low: f64,
    pub bid_high: f64,
    pub competition: Competition,
    /// Origin site tag, e.g. `brand_website`.
    pub source: String,
}

impl KeywordRecord {
    pub fn new(
        keyword: &str,
        search_volume: u64,
        bid_low: f64,
        bid_high: f64,
        competition: Competition,
        source: &str,
    ) -> Self {
        KeywordRecord {
            id: RecordId(0),
            keyword: keyword.to_string(),
            search_volume,
            bid_low,
            bid_high,
            competition,
            source: source.to_string(),
        }
    }

    pub fn avg_bid(&self) -> f64 {
        (self.bid_low + self.bid_high) / 2.0
    }

    fn check(&self, row: usize) -> AnalysisResult<()> {
        let invalid = |reason: String| AnalysisError::InvalidRecord { row, reason };
        if self.keyword.trim().is_empty() {
            return Err(invalid("empty keyword".into()));
        }
        if !self.bid_low.is_finite() || !self.bid_high.is_finite() {
            return Err(invalid("bids must be finite".into()));
        }
        if self.bid_low < 0.0 || self.bid_high < 0.0 {
            return Err(invalid("bids must be non-negative".into()));
        }
        if self.bid_low > self.bid_high {
            return Err(invalid(format!(
                "bid_low {} exceeds bid_high {}",
                self.bid_low, self.bid_high
            )));
        }
        Ok(())
    }
}

/// One CSV row as written by the keyword collector. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct KeywordRow {
    keyword: String,
    search_volume: u64,
    #[serde(alias = "bid_low")]
    top_of_page_bid_low: f64,
    #[serde(alias = "bid_high")]
    top_of_page_bid_high: f64,
    competition: String,
    #[serde(default)]
    source: String,
}

/// Ordered, read-only keyword table for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct KeywordDataset {
    records: Vec<KeywordRecord>,
}

impl KeywordDataset {
    /// Validates every record and assigns ids by position.
    pub fn new(records: Vec<KeywordRecord>) -> AnalysisResult<Self> {
        let mut records = records;
        for (idx, record) in records.iter_mut().enumerate() {
            record.check(idx + 1)?;
            record.id = RecordId(idx as u64);
        }
        Ok(KeywordDataset { records })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut records = Vec::new();
        for (idx, row) in csv_reader.deserialize::<KeywordRow>().enumerate() {
            let row = row.with_context(|| format!("Failed to read keyword row {}", idx + 1))?;
            let competition = row
                .competition
                .parse::<Competition>()
                .map_err(|reason| AnalysisError::InvalidRecord { row: idx + 1, reason })?;
            records.push(KeywordRecord::new(
                &row.keyword,
                row.search_volume,
                row.top_of_page_bid_low,
                row.top_of_page_bid_high,
                competition,
                &row.source,
            ));
        }
        Ok(Self::new(records)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let dataset = Self::from_reader(file)
            .with_context(|| format!("Failed to load keywords from {:?}", path))?;
        if dataset.is_empty() {
            warn!("{:?} has a header but no keyword rows", path);
        }
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[KeywordRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeywordRecord> {
        self.records.iter()
    }

    /// First `n` records in load order.
    pub fn head(&self, n: usize) -> &[KeywordRecord] {
        &self.records[..n.min(self.records.len())]
    }

    pub fn get(&self, id: RecordId) -> Option<&KeywordRecord> {
        self.records.get(id.0 as usize).filter(|r| r.id == id)
    }

    pub fn total_volume(&self) -> u64 {
        self.records.iter().map(|r| r.search_volume).sum()
    }

    pub fn avg_bids(&self) -> Vec<f64> {
        self.records.iter().map(KeywordRecord::avg_bid).collect()
    }
}

/// Lexically greatest `kw_*.csv`, falling back to `wordstream_keywords_*.csv`,
/// across `dirs` (first directory with a match wins).
pub fn find_latest_keywords_file(dirs: &[&Path]) -> Option<PathBuf> {
    for prefix in ["kw_", "wordstream_keywords_"] {
        for dir in dirs {
            let Ok(entries) = fs::read_dir(dir) else {
                continue;
            };
            let latest = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(prefix) && n.ends_with(".csv"))
                        .unwrap_or(false)
                })
                .max();
            if latest.is_some() {
                return latest;
            }
        }
    }
    None
}
