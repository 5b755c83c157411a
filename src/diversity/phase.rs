use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse market-regime label of a historical window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
    Recovery,
    Capitulation,
    Unknown,
}

impl MarketPhase {
    pub const ALL: [MarketPhase; 7] = [
        MarketPhase::Accumulation,
        MarketPhase::Markup,
        MarketPhase::Distribution,
        MarketPhase::Markdown,
        MarketPhase::Recovery,
        MarketPhase::Capitulation,
        MarketPhase::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accumulation => "accumulation",
            Self::Markup => "markup",
            Self::Distribution => "distribution",
            Self::Markdown => "markdown",
            Self::Recovery => "recovery",
            Self::Capitulation => "capitulation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cut-offs for the phase rule table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseRules {
    /// Per-day log-price slope beyond which a window is trending.
    pub trend_slope: f64,
    /// Half-window return that counts as a directional leg.
    pub half_move: f64,
    /// Total window return at or below which a high-volatility drop is a capitulation.
    pub capitulation_drop: f64,
    /// Volatility percentile at or above which the window end counts as high-volatility.
    pub high_vol_percentile: f64,
}

impl Default for PhaseRules {
    fn default() -> Self {
        Self {
            trend_slope: 0.001,
            half_move: 0.05,
            capitulation_drop: 0.15,
            high_vol_percentile: 0.8,
        }
    }
}

/// Signals derived from a single window's closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseSignals {
    pub trend_slope: f64,
    pub total_return: f64,
    pub first_half_return: f64,
    pub second_half_return: f64,
    pub volatility_percentile: f64,
}

/// Minimum usable closes for a classification other than `Unknown`.
const MIN_CLASSIFIABLE: usize = 4;

pub fn phase_signals(closes: &[f64]) -> Option<PhaseSignals> {
    if closes.len() < MIN_CLASSIFIABLE || closes.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return None;
    }
    let logs: Vec<f64> = closes.iter().map(|c| c.ln()).collect();
    let mid = closes.len() / 2;
    let first = closes[0];
    let last = closes[closes.len() - 1];
    Some(PhaseSignals {
        trend_slope: ols_slope(&logs),
        total_return: last / first - 1.0,
        first_half_return: closes[mid] / first - 1.0,
        second_half_return: last / closes[mid] - 1.0,
        volatility_percentile: volatility_percentile(&logs),
    })
}

/// Classify a window's closes with the default rules.
pub fn classify_window(closes: &[f64]) -> MarketPhase {
    classify_with(closes, &PhaseRules::default())
}

pub fn classify_with(closes: &[f64], rules: &PhaseRules) -> MarketPhase {
    match phase_signals(closes) {
        Some(signals) => classify_signals(&signals, rules),
        None => MarketPhase::Unknown,
    }
}

pub fn classify_signals(s: &PhaseSignals, rules: &PhaseRules) -> MarketPhase {
    let high_vol = s.volatility_percentile >= rules.high_vol_percentile;
    if s.total_return <= -rules.capitulation_drop && high_vol {
        return MarketPhase::Capitulation;
    }
    if s.first_half_return <= -rules.half_move
        && s.second_half_return >= rules.half_move
        && s.trend_slope > -rules.trend_slope
    {
        return MarketPhase::Recovery;
    }
    if s.trend_slope <= -rules.trend_slope {
        return MarketPhase::Markdown;
    }
    if s.trend_slope >= rules.trend_slope {
        return MarketPhase::Markup;
    }
    // Sideways from here on.
    if s.first_half_return >= rules.half_move && s.second_half_return <= -rules.half_move {
        return MarketPhase::Distribution;
    }
    if high_vol {
        MarketPhase::Distribution
    } else {
        MarketPhase::Accumulation
    }
}

fn ols_slope(ys: &[f64]) -> f64 {
    let n = ys.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den <= f64::EPSILON {
        0.0
    } else {
        num / den
    }
}

/// Share of the window's rolling volatilities strictly below the trailing one.
fn volatility_percentile(log_closes: &[f64]) -> f64 {
    let returns: Vec<f64> = log_closes.windows(2).map(|w| w[1] - w[0]).collect();
    let span = (returns.len() / 6).max(3);
    if returns.len() < span + 1 {
        return 0.5;
    }
    let vols: Vec<f64> = returns.windows(span).map(population_std).collect();
    let last = vols[vols.len() - 1];
    // Ignore rounding noise on flat windows.
    let cutoff = last - last.abs() * 1e-9;
    let below = vols[..vols.len() - 1].iter().filter(|v| **v < cutoff).count();
    below as f64 / (vols.len() - 1) as f64
}

fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
}
