//! Target CPC and per-keyword bid recommendations.
//!
//! All values stay unrounded here; the report sink rounds to cents.

use tracing::{debug, info};

use crate::classify::{AdGroups, MatchType};
use crate::config::AssumptionSettings;
use crate::dataset::{Competition, KeywordDataset, KeywordRecord, RecordId};
use crate::error::{AnalysisError, AnalysisResult};
use crate::segmentation::median;

/// Share of shopping impressions assumed to click through.
const SHOPPING_CLICK_RATE: f64 = 0.01;
/// Used by the shopping channel when no conversion rate is configured.
pub const DEFAULT_SHOPPING_CONVERSION_RATE: f64 = 0.02;

/// Global search target CPC from the budget and funnel assumptions, capped at
/// `max_cpc_cap` (the median average bid when not configured).
pub fn target_cpc(
    dataset: &KeywordDataset,
    assumptions: &AssumptionSettings,
    search_budget: f64,
) -> AnalysisResult<f64> {
    let assumptions = assumptions.resolve()?;

    let total_volume = dataset.total_volume() as f64;
    let expected_clicks = total_volume * assumptions.ctr;
    let expected_conversions = expected_clicks * assumptions.conversion_rate;

    if search_budget <= 0.0 {
        return Err(AnalysisError::InsufficientData(format!(
            "search budget must be positive, got {}",
            search_budget
        )));
    }
    if expected_conversions <= 0.0 {
        return Err(AnalysisError::InsufficientData(format!(
            "no expected conversions from {} total searches",
            total_volume
        )));
    }

    let target_cpa = search_budget / expected_conversions;
    let uncapped = target_cpa * assumptions.conversion_rate;

    let cap = match assumptions.max_cpc_cap {
        Some(cap) => cap,
        None => median(&dataset.avg_bids()).ok_or(AnalysisError::EmptyDataset)?,
    };

    debug!(
        expected_clicks,
        expected_conversions, target_cpa, uncapped, cap, "Target CPC inputs"
    );
    Ok(uncapped.min(cap))
}

pub fn search_suggested_cpc(record: &KeywordRecord, target_cpc: f64) -> f64 {
    let avg = record.avg_bid();
    match record.competition {
        Competition::High => (avg * 1.2).min(target_cpc * 1.5),
        Competition::Medium => avg.min(target_cpc),
        Competition::Low => (avg * 0.8).min(target_cpc * 0.8),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchBid {
    pub ad_group: String,
    pub keyword: String,
    pub search_volume: u64,
    pub match_type: MatchType,
    pub suggested_cpc: f64,
    pub competition: Competition,
    pub source: String,
    pub intent: String,
    pub reasoning: String,
}

/// One row per classified keyword, grouped in ad group order.
pub fn search_campaign(groups: &AdGroups<'_>, target_cpc: f64) -> Vec<SearchBid> {
    let rows: Vec<SearchBid> = groups
        .groups
        .iter()
        .flat_map(|(name, members)| {
            members.iter().map(move |m| SearchBid {
                ad_group: name.clone(),
                keyword: m.record.keyword.clone(),
                search_volume: m.record.search_volume,
                match_type: m.annotation.match_type,
                suggested_cpc: search_suggested_cpc(m.record, target_cpc),
                competition: m.record.competition,
                source: m.record.source.clone(),
                intent: m.annotation.intent.clone(),
                reasoning: m.annotation.reasoning.clone(),
            })
        })
        .collect();
    info!(
        ad_groups = groups.groups.len(),
        keywords = groups.keyword_count(),
        "Search campaign built"
    );
    rows
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShoppingBid {
    pub id: RecordId,
    pub keyword: String,
    pub search_volume: u64,
    pub avg_bid: f64,
    pub suggested_cpc: f64,
    pub competition: Competition,
    pub target_cpa: f64,
}

fn shopping_suggested_cpc(competition: Competition, target_cpc: f64, avg_bid: f64) -> f64 {
    match competition {
        Competition::High => (target_cpc * 1.3).min(avg_bid * 1.5),
        Competition::Medium => (target_cpc * 1.1).min(avg_bid * 1.2),
        Competition::Low => (target_cpc * 0.9).min(avg_bid * 0.8),
    }
}

/// Shopping bids for every record, highest suggested CPC first. The budget is
/// split evenly across keywords.
pub fn shopping_bids(
    dataset: &KeywordDataset,
    shopping_budget: f64,
    conversion_rate: f64,
) -> Vec<ShoppingBid> {
    let budget_per_keyword = shopping_budget / dataset.len().max(1) as f64;

    let mut bids: Vec<ShoppingBid> = dataset
        .iter()
        .map(|record| {
            let avg_bid = record.avg_bid();
            let expected_clicks = record.search_volume as f64 * SHOPPING_CLICK_RATE;
            let expected_conversions = expected_clicks * conversion_rate;
            let target_cpc = if expected_conversions > 0.0 {
                budget_per_keyword / expected_conversions * conversion_rate
            } else {
                avg_bid
            };
            ShoppingBid {
                id: record.id,
                keyword: record.keyword.clone(),
                search_volume: record.search_volume,
                avg_bid,
                suggested_cpc: shopping_suggested_cpc(record.competition, target_cpc, avg_bid),
                competition: record.competition,
                target_cpa: budget_per_keyword / expected_conversions.max(1.0),
            }
        })
        .collect();

    bids.sort_by(|a, b| b.suggested_cpc.total_cmp(&a.suggested_cpc));
    info!(
        keywords = bids.len(),
        budget_per_keyword, "Shopping bids computed"
    );
    bids
}
