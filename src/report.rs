//! CSV report sink.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use tracing::info;

use crate::bids::{SearchBid, ShoppingBid};
use crate::dataset::KeywordRecord;
use crate::themes::ThemeSet;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Cents, for presentation only.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

const SEARCH_HEADERS: &[&str] = &[
    "Ad Group",
    "Keyword",
    "Search Volume",
    "Match Type",
    "Suggested CPC",
    "Competition",
    "Source",
    "Intent",
    "Reasoning",
];
const THEME_HEADERS: &[&str] = &["Theme Category", "Theme"];
const SHOPPING_HEADERS: &[&str] = &[
    "Keyword",
    "Search Volume",
    "Avg Bid",
    "Suggested CPC",
    "Competition",
    "Target CPA",
];
const UNCLASSIFIED_HEADERS: &[&str] = &["Keyword", "Search Volume", "Competition", "Source"];

// Field order must match the header lists above.
#[derive(Serialize)]
struct SearchRow<'a> {
    ad_group: &'a str,
    keyword: &'a str,
    search_volume: u64,
    match_type: &'a str,
    suggested_cpc: f64,
    competition: &'a str,
    source: &'a str,
    intent: &'a str,
    reasoning: &'a str,
}

#[derive(Serialize)]
struct ThemeRow<'a> {
    category: &'a str,
    theme: &'a str,
}

#[derive(Serialize)]
struct ShoppingRow<'a> {
    keyword: &'a str,
    search_volume: u64,
    avg_bid: f64,
    suggested_cpc: f64,
    competition: &'a str,
    target_cpa: f64,
}

#[derive(Serialize)]
struct UnclassifiedRow<'a> {
    keyword: &'a str,
    search_volume: u64,
    competition: &'a str,
    source: &'a str,
}

/// Everything one analysis run exports.
pub struct Report<'a> {
    pub search: &'a [SearchBid],
    pub themes: &'a ThemeSet,
    pub shopping: &'a [ShoppingBid],
    pub unclassified: &'a [&'a KeywordRecord],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportPaths {
    pub search: PathBuf,
    pub pmax: PathBuf,
    pub shopping: PathBuf,
    pub unclassified: Option<PathBuf>,
}

impl ReportPaths {
    pub fn all(&self) -> Vec<&Path> {
        let mut out = vec![self.search.as_path(), self.pmax.as_path(), self.shopping.as_path()];
        out.extend(self.unclassified.as_deref());
        out
    }
}

/// Header line first, even when there are no rows.
fn write_rows<S: Serialize>(
    path: &Path,
    headers: &[&str],
    rows: impl IntoIterator<Item = S>,
) -> Result<usize> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    wtr.write_record(headers)
        .with_context(|| format!("Failed to write header to {:?}", path))?;
    let mut count = 0;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("Failed to write row to {:?}", path))?;
        count += 1;
    }
    wtr.flush()?;
    Ok(count)
}

/// Write the report set into `dir`. Files are named `<kind>_<stamp>.csv`.
pub fn write_reports(dir: &Path, stamp: &str, report: &Report<'_>) -> Result<ReportPaths> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output dir {:?}", dir))?;

    let paths = ReportPaths {
        search: dir.join(format!("search_{}.csv", stamp)),
        pmax: dir.join(format!("pmax_{}.csv", stamp)),
        shopping: dir.join(format!("shop_{}.csv", stamp)),
        unclassified: (!report.unclassified.is_empty())
            .then(|| dir.join(format!("unclassified_{}.csv", stamp))),
    };

    let n = write_rows(
        &paths.search,
        SEARCH_HEADERS,
        report.search.iter().map(|b| SearchRow {
            ad_group: &b.ad_group,
            keyword: &b.keyword,
            search_volume: b.search_volume,
            match_type: b.match_type.as_str(),
            suggested_cpc: round2(b.suggested_cpc),
            competition: b.competition.as_str(),
            source: &b.source,
            intent: &b.intent,
            reasoning: &b.reasoning,
        }),
    )?;
    info!(rows = n, path = %paths.search.display(), "Search campaign written");

    let n = write_rows(
        &paths.pmax,
        THEME_HEADERS,
        report.themes.iter().map(|(category, theme)| ThemeRow {
            category: category.label(),
            theme,
        }),
    )?;
    info!(rows = n, path = %paths.pmax.display(), "PMax themes written");

    let n = write_rows(
        &paths.shopping,
        SHOPPING_HEADERS,
        report.shopping.iter().map(|b| ShoppingRow {
            keyword: &b.keyword,
            search_volume: b.search_volume,
            avg_bid: round2(b.avg_bid),
            suggested_cpc: round2(b.suggested_cpc),
            competition: b.competition.as_str(),
            target_cpa: round2(b.target_cpa),
        }),
    )?;
    info!(rows = n, path = %paths.shopping.display(), "Shopping bids written");

    if let Some(path) = &paths.unclassified {
        let n = write_rows(
            path,
            UNCLASSIFIED_HEADERS,
            report.unclassified.iter().map(|r| UnclassifiedRow {
                keyword: &r.keyword,
                search_volume: r.search_volume,
                competition: r.competition.as_str(),
                source: &r.source,
            }),
        )?;
        info!(rows = n, path = %path.display(), "Unclassified keywords written");
    }

    Ok(paths)
}
