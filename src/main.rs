mod bids;
mod classify;
mod config;
mod dataset;
mod db;
mod error;
mod extraction;
mod llm;
mod pipeline;
mod report;
mod segmentation;
mod themes;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::dataset::{find_latest_keywords_file, KeywordDataset, KeywordRecord};
use crate::llm::TextGenerator;

const KEYWORDS_ENV: &str = "SEM_KEYWORDS_FILE";
const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Parser)]
#[command(name = "sem_planner", about = "SEM keyword analysis and bid planning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify keywords, generate themes and write campaign reports
    Analyze {
        /// Keyword CSV (default: $SEM_KEYWORDS_FILE or the latest kw_*.csv)
        #[arg(short, long)]
        keywords: Option<PathBuf>,
        /// Config file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
        /// Report directory (overrides output_dir from the config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Print volume/bid statistics and keyword segments
    Segment {
        #[arg(short, long)]
        keywords: Option<PathBuf>,
        /// Config file whose output_dir is searched for kw_*.csv (default: ./output)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Max keywords to list per segment
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Compute target CPC and shopping bids without calling the model
    Bids {
        #[arg(short, long)]
        keywords: Option<PathBuf>,
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// List recent analysis runs
    History {
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze {
            keywords,
            config,
            output_dir,
        } => {
            let settings = Settings::load(&config)?;
            let output_dir = output_dir.unwrap_or_else(|| settings.output_dir.clone());
            let keywords_file = resolve_keywords_file(keywords, &output_dir)?;
            let dataset = KeywordDataset::load(&keywords_file)?;
            println!("Loaded {} keywords from {}", dataset.len(), keywords_file.display());

            let api_key = env::var(API_KEY_ENV).unwrap_or_default();
            let model = llm::resolve_model(&settings.llm, &api_key)
                .context("Failed to initialise the Gemini client")?;

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] batch {pos}/{len}")?
                    .progress_chars("#>-"),
            );

            let analysis = pipeline::Analyzer::new(&model, &settings)
                .with_progress(pb)
                .analyze(&dataset)?;

            let stamp = report::timestamp(&chrono::Local::now());
            let outcome = pipeline::persist(
                &analysis,
                &settings,
                &dataset,
                &keywords_file,
                &output_dir,
                model.model(),
                &stamp,
            )?;

            println!(
                "{} high-volume, {} cost-effective, {} low-competition keywords.",
                analysis.segmentation.high_volume.len(),
                analysis.segmentation.cost_effective.len(),
                analysis.segmentation.low_comp_high_vol.len()
            );
            println!(
                "Classified {}/{} keywords into {} ad groups (target CPC {:.2}).",
                analysis.classified(),
                dataset.len(),
                analysis.ad_groups,
                analysis.target_cpc
            );
            if !analysis.unclassified.is_empty() {
                println!(
                    "{} keywords were not classified by the model.",
                    analysis.unclassified.len()
                );
            }
            println!("Run #{} reports:", outcome.run_id);
            for path in outcome.paths.all() {
                println!("  {}", path.display());
            }
            Ok(())
        }
        Commands::Segment {
            keywords,
            config,
            limit,
        } => {
            let output_dir = Settings::output_dir_from(config.as_deref())?;
            let keywords_file = resolve_keywords_file(keywords, &output_dir)?;
            let dataset = KeywordDataset::load(&keywords_file)?;
            let seg = segmentation::segment(&dataset)?;

            println!("Keywords:      {}", dataset.len());
            println!("Search volume: {}", seg.volume);
            println!("Average bid:   {}", seg.avg_bid);
            print_segment(
                &format!("High volume (>= {:.0})", seg.high_volume_threshold),
                &seg.high_volume,
                limit,
            );
            print_segment("Cost effective", &seg.cost_effective, limit);
            print_segment("Low competition, high volume", &seg.low_comp_high_vol, limit);
            Ok(())
        }
        Commands::Bids {
            keywords,
            config,
            limit,
        } => {
            let settings = Settings::load(&config)?;
            let keywords_file = resolve_keywords_file(keywords, &settings.output_dir)?;
            let dataset = KeywordDataset::load(&keywords_file)?;

            let target = bids::target_cpc(&dataset, &settings.assumptions, settings.search_ads_budget)?;
            println!("Target CPC: {:.2}", target);

            let conversion_rate = settings
                .assumptions
                .conversion_rate
                .unwrap_or(bids::DEFAULT_SHOPPING_CONVERSION_RATE);
            let shopping = bids::shopping_bids(&dataset, settings.shopping_ads_budget, conversion_rate);

            println!(
                "\n{:<32} | {:>8} | {:<6} | {:>10} | {:>12} | {:>10}",
                "Keyword", "Volume", "Comp", "Search CPC", "Shopping CPC", "Target CPA"
            );
            println!("{}", "-".repeat(95));
            for bid in shopping.iter().take(limit) {
                let search_cpc = dataset
                    .get(bid.id)
                    .map(|r| bids::search_suggested_cpc(r, target))
                    .unwrap_or_default();
                println!(
                    "{:<32} | {:>8} | {:<6} | {:>10.2} | {:>12.2} | {:>10.2}",
                    truncate(&bid.keyword, 32),
                    bid.search_volume,
                    bid.competition,
                    search_cpc,
                    bid.suggested_cpc,
                    bid.target_cpa
                );
            }
            println!("\n{} of {} keywords shown", shopping.len().min(limit), shopping.len());
            Ok(())
        }
        Commands::History { config, limit } => {
            let settings = Settings::load(&config)?;
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let runs = db::recent_runs(&conn, limit)?;
            if runs.is_empty() {
                println!("No runs recorded. Run 'analyze' first.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<15} | {:<16} | {:<18} | {:>9} | {:>6} | {:>7}",
                "#", "Stamp", "Brand", "Model", "Keywords", "Groups", "CPC"
            );
            println!("{}", "-".repeat(95));
            for r in &runs {
                println!(
                    "{:>4} | {:<15} | {:<16} | {:<18} | {:>4}/{:<4} | {:>6} | {:>7.2}",
                    r.id,
                    r.stamp,
                    truncate(&r.brand, 16),
                    truncate(&r.model, 18),
                    r.classified_count,
                    r.keyword_count,
                    r.ad_groups,
                    r.target_cpc
                );
            }
            if let Some(latest) = runs.first() {
                println!(
                    "\nLatest: {} (recorded {})",
                    latest.keywords_file, latest.created_at
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Explicit path, then `$SEM_KEYWORDS_FILE`, then the newest collector
/// export in `output_dir` or the working directory.
fn resolve_keywords_file(explicit: Option<PathBuf>, output_dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = env::var_os(KEYWORDS_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    match find_latest_keywords_file(&[output_dir, Path::new(".")]) {
        Some(path) => Ok(path),
        None => bail!(
            "No keyword file given and no kw_*.csv found in {:?} or the working directory",
            output_dir
        ),
    }
}

fn print_segment(title: &str, records: &[&KeywordRecord], limit: usize) {
    println!("\n--- {} ({}) ---", title, records.len());
    for r in records.iter().take(limit) {
        println!(
            "  {:<32} {:>8} {:>6.2} {}",
            truncate(&r.keyword, 32),
            r.search_volume,
            r.avg_bid(),
            r.competition
        );
    }
    if records.len() > limit {
        println!("  ... {} more", records.len() - limit);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
