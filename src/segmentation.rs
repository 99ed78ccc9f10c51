//! Descriptive statistics and labelled keyword subsets.

use std::fmt;

use crate::dataset::{Competition, KeywordDataset, KeywordRecord};
use crate::error::{AnalysisError, AnalysisResult};

const HIGH_VOLUME_QUANTILE: f64 = 0.8;

/// Quantile of already-sorted values, interpolating linearly between the
/// two closest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile(&sorted, 0.5)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; undefined for a single value.
    pub std: Option<f64>,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

impl Stats {
    pub fn describe(values: &[f64]) -> AnalysisResult<Stats> {
        if values.is_empty() {
            return Err(AnalysisError::EmptyDataset);
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let std = (count > 1).then(|| {
            let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        });
        let q = |p: f64| quantile(&sorted, p).unwrap_or_default();
        Ok(Stats {
            count,
            mean,
            std,
            min: sorted[0],
            p25: q(0.25),
            p50: q(0.5),
            p75: q(0.75),
            max: sorted[count - 1],
        })
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count={} mean={:.2} min={:.2} 25%={:.2} 50%={:.2} 75%={:.2} max={:.2}",
            self.count, self.mean, self.min, self.p25, self.p50, self.p75, self.max
        )
    }
}

#[derive(Debug, Clone)]
pub struct Segmentation<'a> {
    pub volume: Stats,
    pub avg_bid: Stats,
    pub high_volume_threshold: f64,
    /// `search_volume >= P80(search_volume)`
    pub high_volume: Vec<&'a KeywordRecord>,
    /// Cheaper than the median bid with at least median volume.
    pub cost_effective: Vec<&'a KeywordRecord>,
    /// Low or Medium competition with at least median volume.
    pub low_comp_high_vol: Vec<&'a KeywordRecord>,
}

pub fn segment(dataset: &KeywordDataset) -> AnalysisResult<Segmentation<'_>> {
    let volumes: Vec<f64> = dataset.iter().map(|r| r.search_volume as f64).collect();
    let volume = Stats::describe(&volumes)?;
    let avg_bid = Stats::describe(&dataset.avg_bids())?;

    let mut sorted_volumes = volumes;
    sorted_volumes.sort_by(f64::total_cmp);
    let high_volume_threshold =
        quantile(&sorted_volumes, HIGH_VOLUME_QUANTILE).ok_or(AnalysisError::EmptyDataset)?;

    let median_volume = volume.p50;
    let median_bid = avg_bid.p50;

    let high_volume = dataset
        .iter()
        .filter(|r| r.search_volume as f64 >= high_volume_threshold)
        .collect();
    let cost_effective = dataset
        .iter()
        .filter(|r| r.avg_bid() <= median_bid && r.search_volume as f64 >= median_volume)
        .collect();
    let low_comp_high_vol = dataset
        .iter()
        .filter(|r| {
            matches!(r.competition, Competition::Low | Competition::Medium)
                && r.search_volume as f64 >= median_volume
        })
        .collect();

    Ok(Segmentation {
        volume,
        avg_bid,
        high_volume_threshold,
        high_volume,
        cost_effective,
        low_comp_high_vol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Path;

    fn fixture() -> KeywordDataset {
        KeywordDataset::load(Path::new("tests/fixtures/keywords.csv")).unwrap()
    }

    fn keywords(records: &[&KeywordRecord]) -> Vec<String> {
        let mut out: Vec<String> = records.iter().map(|r| r.keyword.clone()).collect();
        out.sort();
        out
    }

    #[test]
    fn quantile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.0), Some(1.0));
        assert_eq!(quantile(&sorted, 1.0), Some(4.0));
        assert_eq!(quantile(&sorted, 0.5), Some(2.5));
        assert!((quantile(&sorted, 0.8).unwrap() - 3.4).abs() < 1e-9);
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
    }

    #[test]
    fn describe_fixture_volumes() {
        let ds = fixture();
        let seg = segment(&ds).unwrap();
        assert_eq!(seg.volume.count, 12);
        assert_eq!(seg.volume.min, 880.0);
        assert_eq!(seg.volume.max, 40000.0);
        assert!((seg.volume.p25 - 2275.0).abs() < 1e-9);
        assert!((seg.volume.p50 - 4500.0).abs() < 1e-9);
        assert!((seg.volume.p75 - 9075.0).abs() < 1e-9);
        assert!((seg.volume.mean - 107080.0 / 12.0).abs() < 1e-6);
        assert!((seg.avg_bid.p50 - 1.4).abs() < 1e-9);
        assert!((seg.high_volume_threshold - 11220.0).abs() < 1e-9);
    }

    #[test]
    fn fixture_segments() {
        let ds = fixture();
        let seg = segment(&ds).unwrap();
        assert_eq!(
            keywords(&seg.high_volume),
            vec!["nike pegasus", "running shoes", "shoes"]
        );
        assert_eq!(
            keywords(&seg.cost_effective),
            vec!["nike pegasus", "shoes", "sneaker sale"]
        );
        assert_eq!(
            keywords(&seg.low_comp_high_vol),
            vec!["best walking shoes for women", "nike pegasus", "trail running shoes"]
        );
    }

    #[test]
    fn empty_dataset_fails() {
        let err = segment(&KeywordDataset::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyDataset));
    }

    #[test]
    fn single_row_has_no_std() {
        let ds = KeywordDataset::new(vec![KeywordRecord::new(
            "solo",
            100,
            1.0,
            1.0,
            Competition::Low,
            "s",
        )])
        .unwrap();
        let seg = segment(&ds).unwrap();
        assert_eq!(seg.volume.std, None);
        assert_eq!(seg.high_volume.len(), 1);
    }

    proptest! {
        #[test]
        fn high_volume_partitions_on_p80(volumes in prop::collection::vec(0u64..100_000, 1..60)) {
            let records = volumes
                .iter()
                .enumerate()
                .map(|(i, v)| KeywordRecord::new(&format!("kw{}", i), *v, 0.5, 1.5, Competition::Medium, "s"))
                .collect();
            let ds = KeywordDataset::new(records).unwrap();
            let seg = segment(&ds).unwrap();
            let t = seg.high_volume_threshold;

            for r in &seg.high_volume {
                prop_assert!(r.search_volume as f64 >= t);
            }
            let members: std::collections::HashSet<_> = seg.high_volume.iter().map(|r| r.id).collect();
            for r in ds.iter().filter(|r| !members.contains(&r.id)) {
                prop_assert!((r.search_volume as f64) < t);
            }
            prop_assert!(!seg.high_volume.is_empty());
        }
    }
}
