use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{AnalysisError, AnalysisResult};

pub const ENV_PREFIX: &str = "SEM";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub brand_website: String,
    #[serde(default)]
    pub competitor_website: String,
    #[serde(default)]
    pub search_ads_budget: f64,
    #[serde(default)]
    pub shopping_ads_budget: f64,
    #[serde(default)]
    pub assumptions: AssumptionSettings,
    /// Consumed by the keyword collector, not by the analysis.
    #[serde(default)]
    pub service_locations: Vec<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub llm: LlmSettings,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/sem_runs.sqlite")
}

/// Funnel assumptions as written in the config file. Keys may be absent;
/// `resolve` decides whether that is fatal.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssumptionSettings {
    pub ctr: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub max_cpc_cap: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assumptions {
    pub ctr: f64,
    pub conversion_rate: f64,
    pub max_cpc_cap: Option<f64>,
}

impl AssumptionSettings {
    pub fn resolve(&self) -> AnalysisResult<Assumptions> {
        let missing: Vec<String> = [("ctr", self.ctr), ("conversion_rate", self.conversion_rate)]
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AnalysisError::MissingAssumption(missing));
        }

        let ctr = fraction("ctr", self.ctr.unwrap_or_default())?;
        let conversion_rate = fraction("conversion_rate", self.conversion_rate.unwrap_or_default())?;
        Ok(Assumptions {
            ctr,
            conversion_rate,
            max_cpc_cap: self.max_cpc_cap,
        })
    }
}

fn fraction(key: &'static str, value: f64) -> AnalysisResult<f64> {
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(AnalysisError::InvalidAssumption { key, value })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Preference order for model resolution.
    pub models: Vec<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff_seconds: u64,
    pub timeout_seconds: u64,
    pub theme_top_n: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        LlmSettings {
            models: vec![
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-pro".to_string(),
                "gemini-pro".to_string(),
            ],
            batch_size: crate::classify::DEFAULT_BATCH_SIZE,
            max_retries: 2,
            backoff_seconds: 10,
            timeout_seconds: 60,
            theme_top_n: crate::themes::DEFAULT_TOP_N,
        }
    }
}

impl Settings {
    /// Load `path` (YAML/TOML/JSON by extension), overlaid with `SEM__*`
    /// environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {:?}", path))?
            .try_deserialize()
            .with_context(|| format!("Invalid config {:?}", path))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Report directory from an optional config file. Without one, the
    /// default `output` directory.
    pub fn output_dir_from(config: Option<&Path>) -> Result<PathBuf> {
        match config {
            Some(path) => Ok(Settings::load(path)?.output_dir),
            None => Ok(default_output_dir()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.search_ads_budget < 0.0 || self.shopping_ads_budget < 0.0 {
            bail!("budgets must be non-negative");
        }
        if self.llm.batch_size == 0 {
            bail!("llm.batch_size must be at least 1");
        }
        if self.llm.models.is_empty() {
            bail!("llm.models must list at least one model");
        }
        Ok(())
    }

    pub fn brand_name(&self) -> String {
        display_brand_name(&self.brand_website)
    }

    pub fn competitor_name(&self) -> String {
        display_brand_name(&self.competitor_website)
    }
}

/// `https://www.acme-shoes.co.uk/sale` → `Acme-Shoes`.
pub fn display_brand_name(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return "Unknown".to_string();
    }
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let domain = rest.split('/').next().unwrap_or_default();
    let label = domain.split('.').next().unwrap_or_default();
    if label.is_empty() {
        return "Unknown".to_string();
    }
    title_case(label)
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}
