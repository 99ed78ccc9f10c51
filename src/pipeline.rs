//! One analysis run: every structure is computed before anything is written.

use std::path::Path;

use anyhow::Result;
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::bids::{self, SearchBid, ShoppingBid, DEFAULT_SHOPPING_CONVERSION_RATE};
use crate::classify::{ClassificationOutcome, Classifier};
use crate::config::Settings;
use crate::dataset::{KeywordDataset, KeywordRecord};
use crate::db;
use crate::error::AnalysisResult;
use crate::extraction::retry::StructuredCaller;
use crate::extraction::RetryPolicy;
use crate::llm::TextGenerator;
use crate::report::{self, Report, ReportPaths};
use crate::segmentation::{self, Segmentation};
use crate::themes::{self, ThemeSet};

pub struct Analysis<'a> {
    pub segmentation: Segmentation<'a>,
    pub target_cpc: f64,
    pub search: Vec<SearchBid>,
    pub themes: ThemeSet,
    pub shopping: Vec<ShoppingBid>,
    pub unclassified: Vec<&'a KeywordRecord>,
    pub ad_groups: usize,
}

impl<'a> Analysis<'a> {
    pub fn report(&self) -> Report<'_> {
        Report {
            search: &self.search,
            themes: &self.themes,
            shopping: &self.shopping,
            unclassified: &self.unclassified,
        }
    }

    pub fn classified(&self) -> usize {
        self.search.len()
    }
}

pub struct Analyzer<'a> {
    model: &'a dyn TextGenerator,
    settings: &'a Settings,
    progress: ProgressBar,
}

impl<'a> Analyzer<'a> {
    pub fn new(model: &'a dyn TextGenerator, settings: &'a Settings) -> Self {
        Analyzer {
            model,
            settings,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Segment, price, classify and theme the dataset. Any failure aborts the
    /// whole run. Bid inputs are checked before the first model call.
    pub fn analyze<'d>(&self, dataset: &'d KeywordDataset) -> AnalysisResult<Analysis<'d>> {
        let settings = self.settings;
        let brand = settings.brand_name();
        let competitor = settings.competitor_name();
        debug!(%brand, %competitor, locations = ?settings.service_locations, "Analysis context");

        let segmentation = segmentation::segment(dataset)?;
        info!(volume = %segmentation.volume, "Search volume");
        info!(avg_bid = %segmentation.avg_bid, "Average bid");
        info!(
            high_volume = segmentation.high_volume.len(),
            cost_effective = segmentation.cost_effective.len(),
            low_comp_high_vol = segmentation.low_comp_high_vol.len(),
            "Segments"
        );

        let target_cpc = bids::target_cpc(dataset, &settings.assumptions, settings.search_ads_budget)?;
        info!(target_cpc, "Target CPC");

        let caller = StructuredCaller::new(self.model, RetryPolicy::from_settings(&settings.llm));

        let classification = Classifier::new(caller, &brand, &competitor)
            .with_batch_size(settings.llm.batch_size)
            .with_progress(self.progress.clone())
            .classify(dataset.records())?;
        let groups = classification.ad_groups(dataset);
        let search = bids::search_campaign(&groups, target_cpc);
        let ad_groups = groups.groups.len();

        let unclassified: Vec<&'d KeywordRecord> = dataset
            .iter()
            .filter(|r| classification.outcome(r.id) == ClassificationOutcome::Unclassified)
            .collect();

        let caller = StructuredCaller::new(self.model, RetryPolicy::from_settings(&settings.llm));
        let themes = themes::generate_themes(
            &caller,
            dataset.head(settings.llm.theme_top_n),
            &brand,
            &competitor,
        )?;

        let conversion_rate = settings
            .assumptions
            .conversion_rate
            .unwrap_or(DEFAULT_SHOPPING_CONVERSION_RATE);
        let shopping = bids::shopping_bids(dataset, settings.shopping_ads_budget, conversion_rate);

        Ok(Analysis {
            segmentation,
            target_cpc,
            search,
            themes,
            shopping,
            unclassified,
            ad_groups,
        })
    }
}

pub struct RunOutcome {
    pub run_id: i64,
    pub paths: ReportPaths,
}

/// Write the report files, then record the run in the ledger.
pub fn persist(
    analysis: &Analysis<'_>,
    settings: &Settings,
    dataset: &KeywordDataset,
    keywords_file: &Path,
    output_dir: &Path,
    model: &str,
    stamp: &str,
) -> Result<RunOutcome> {
    let report = analysis.report();
    let paths = report::write_reports(output_dir, stamp, &report)?;

    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn)?;
    let keywords_file = keywords_file.display().to_string();
    let brand = settings.brand_name();
    let competitor = settings.competitor_name();
    let run_id = db::record_run(
        &conn,
        &db::RunSummary {
            stamp,
            keywords_file: &keywords_file,
            brand: &brand,
            competitor: &competitor,
            model,
            keyword_count: dataset.len(),
            classified_count: analysis.classified(),
            target_cpc: analysis.target_cpc,
            search_budget: settings.search_ads_budget,
            shopping_budget: settings.shopping_ads_budget,
        },
        &report,
    )?;
    info!(run_id, "Run recorded");
    Ok(RunOutcome { run_id, paths })
}
