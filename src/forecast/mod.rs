pub mod engine;

use serde::{Deserialize, Serialize};

use crate::model::PriceSeries;
use crate::scanner::Match;

pub use engine::{ForecastEngine, ForecastReport, ForecastRequest, ForecastSettings};

/// Reported percentile levels, lowest first.
pub const PERCENTILES: [f64; 5] = [0.10, 0.25, 0.50, 0.75, 0.90];

/// Hit rate reported when no candidate reaches the horizon.
pub const NEUTRAL_HIT_RATE: f64 = 0.5;

/// Reprojected price percentiles for one forward day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPercentiles {
    /// 0-based forward day; offset 0 is the first bar after the window.
    pub offset: usize,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    /// Candidate paths with data at this offset.
    pub sample_size: usize,
}

impl DayPercentiles {
    fn flat(offset: usize, price: f64) -> Self {
        Self {
            offset,
            p10: price,
            p25: price,
            p50: price,
            p75: price,
            p90: price,
            sample_size: 0,
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.p10, self.p25, self.p50, self.p75, self.p90]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub median_return: f64,
    pub p10_return: f64,
    pub p25_return: f64,
    pub p75_return: f64,
    pub p90_return: f64,
    pub mean_return: f64,
    /// Share of terminal returns above zero.
    pub hit_rate: f64,
    /// Candidate paths contributing at least one forward day.
    pub sample_size: usize,
    /// Candidate paths reaching the final forward day.
    pub terminal_sample_size: usize,
}

impl ForecastSummary {
    fn neutral() -> Self {
        Self {
            median_return: 0.0,
            p10_return: 0.0,
            p25_return: 0.0,
            p75_return: 0.0,
            p90_return: 0.0,
            mean_return: 0.0,
            hit_rate: NEUTRAL_HIT_RATE,
            sample_size: 0,
            terminal_sample_size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDistribution {
    pub anchor_price: f64,
    pub horizon_days: usize,
    pub days: Vec<DayPercentiles>,
    pub summary: ForecastSummary,
}

impl ForecastDistribution {
    /// Flat forecast at `anchor_price` with no samples.
    pub fn flat(horizon_days: usize, anchor_price: f64) -> Self {
        Self {
            anchor_price,
            horizon_days,
            days: (0..horizon_days)
                .map(|offset| DayPercentiles::flat(offset, anchor_price))
                .collect(),
            summary: ForecastSummary::neutral(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.sample_size == 0
    }
}

/// Nearest-rank percentile of an ascending slice: `sorted[floor(p * (n - 1))]`.
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).floor() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

/// Forward returns following a match's window, relative to its last close.
///
/// Offsets past the end of the corpus, or landing on unusable closes, are `None`.
fn aftermath_returns(
    corpus: &PriceSeries,
    m: &Match,
    horizon_days: usize,
) -> Option<Vec<Option<f64>>> {
    let end = corpus.position(m.window.end_date)?;
    let closes = corpus.closes();
    let base = closes[end];
    if !base.is_finite() || base <= 0.0 {
        return None;
    }
    let path: Vec<Option<f64>> = (0..horizon_days)
        .map(|offset| {
            closes
                .get(end + 1 + offset)
                .filter(|c| c.is_finite() && **c > 0.0)
                .map(|c| c / base - 1.0)
        })
        .collect();
    path.iter().any(Option::is_some).then_some(path)
}

/// Aggregate the aftermath of `matches` into a per-day distribution anchored at `anchor_price`.
///
/// Each candidate's forward path is taken as returns from its window's last
/// close and replayed from `anchor_price`. With no usable candidate the
/// result is a flat forecast with `sample_size == 0` and a 0.5 hit rate.
pub fn aggregate(
    matches: &[Match],
    corpus: &PriceSeries,
    horizon_days: usize,
    anchor_price: f64,
) -> ForecastDistribution {
    let paths: Vec<Vec<Option<f64>>> = matches
        .iter()
        .filter_map(|m| aftermath_returns(corpus, m, horizon_days))
        .collect();

    if paths.is_empty() {
        tracing::debug!(
            matches = matches.len(),
            horizon_days,
            "no usable aftermath, returning flat forecast"
        );
        return ForecastDistribution::flat(horizon_days, anchor_price);
    }

    let mut days = Vec::with_capacity(horizon_days);
    let mut column = Vec::with_capacity(paths.len());
    for offset in 0..horizon_days {
        column.clear();
        column.extend(
            paths
                .iter()
                .filter_map(|p| p[offset])
                .map(|r| anchor_price * (1.0 + r)),
        );
        if column.is_empty() {
            days.push(DayPercentiles::flat(offset, anchor_price));
            continue;
        }
        column.sort_by(f64::total_cmp);
        let [p10, p25, p50, p75, p90] =
            PERCENTILES.map(|p| nearest_rank(&column, p).unwrap_or(anchor_price));
        days.push(DayPercentiles {
            offset,
            p10,
            p25,
            p50,
            p75,
            p90,
            sample_size: column.len(),
        });
    }

    let mut terminal: Vec<f64> = match horizon_days.checked_sub(1) {
        Some(last) => paths.iter().filter_map(|p| p[last]).collect(),
        None => Vec::new(),
    };
    terminal.sort_by(f64::total_cmp);

    let summary = if terminal.is_empty() {
        ForecastSummary {
            sample_size: paths.len(),
            ..ForecastSummary::neutral()
        }
    } else {
        let n = terminal.len() as f64;
        let wins = terminal.iter().filter(|r| **r > 0.0).count() as f64;
        let [p10, p25, p50, p75, p90] =
            PERCENTILES.map(|p| nearest_rank(&terminal, p).unwrap_or(0.0));
        ForecastSummary {
            median_return: p50,
            p10_return: p10,
            p25_return: p25,
            p75_return: p75,
            p90_return: p90,
            mean_return: terminal.iter().sum::<f64>() / n,
            hit_rate: wins / n,
            sample_size: paths.len(),
            terminal_sample_size: terminal.len(),
        }
    };

    ForecastDistribution {
        anchor_price,
        horizon_days,
        days,
        summary,
    }
}
