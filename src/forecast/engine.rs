use std::borrow::Cow;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::diversity;
use crate::error::{ForecastError, ForecastResult};
use crate::forecast::{aggregate, ForecastDistribution};
use crate::model::PriceSeries;
use crate::scanner::{
    scan_with, Match, RetrievalMode, RetrievalStrategy, ScanLayout, ScanParams, TwoStageParams,
};
use crate::vector::NormalizationMode;

/// Per-use-case knobs for the analog forecast pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastSettings {
    pub window_len: usize,
    pub min_gap_days: usize,
    /// Ranked candidates handed to the diversity filter.
    pub candidate_pool: usize,
    pub mode: NormalizationMode,
    pub retrieval: RetrievalMode,
    pub two_stage: TwoStageParams,
    pub max_per_phase: usize,
    pub max_total: usize,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            window_len: 60,
            min_gap_days: 120,
            candidate_pool: 50,
            mode: NormalizationMode::ZScore,
            retrieval: RetrievalMode::Auto,
            two_stage: TwoStageParams::default(),
            max_per_phase: 4,
            max_total: 10,
        }
    }
}

impl ForecastSettings {
    pub fn validate(&self) -> ForecastResult<()> {
        if self.window_len < 2 {
            return Err(ForecastError::InvalidParameter(format!(
                "window_len must be >= 2, got {}",
                self.window_len
            )));
        }
        if self.candidate_pool == 0 {
            return Err(ForecastError::InvalidParameter(
                "candidate_pool must be > 0".to_string(),
            ));
        }
        if self.max_per_phase == 0 || self.max_total == 0 {
            return Err(ForecastError::InvalidParameter(
                "max_per_phase and max_total must be > 0".to_string(),
            ));
        }
        if self.two_stage.coarse_stride == 0 {
            return Err(ForecastError::InvalidParameter(
                "two_stage.coarse_stride must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    fn scan_params(&self) -> ScanParams {
        ScanParams {
            window_len: self.window_len,
            min_gap_days: self.min_gap_days,
            top_k: self.candidate_pool,
            mode: self.mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub horizon_days: usize,
    /// Forecast as of this date; `None` uses the whole series.
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastReport {
    pub asset: String,
    pub as_of: NaiveDate,
    pub horizon_days: usize,
    pub anchor_price: f64,
    pub strategy: String,
    pub candidates: usize,
    pub matches: Vec<Match>,
    pub distribution: ForecastDistribution,
}

/// Runs vector building, scanning, diversity filtering and aggregation
/// for one series.
#[derive(Debug, Clone)]
pub struct ForecastEngine {
    settings: ForecastSettings,
}

struct Analogs<'a> {
    corpus: Cow<'a, PriceSeries>,
    matches: Vec<Match>,
    strategy: RetrievalStrategy,
    candidates: usize,
}

impl ForecastEngine {
    pub fn new(settings: ForecastSettings) -> ForecastResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub fn forecast(
        &self,
        series: &PriceSeries,
        request: &ForecastRequest,
    ) -> ForecastResult<ForecastReport> {
        let analogs = self.find_analogs(series, request.as_of)?;
        Ok(self.report(&analogs, request.horizon_days))
    }

    /// Forecast several horizons from a single scan.
    pub fn forecast_horizons(
        &self,
        series: &PriceSeries,
        horizons: &[usize],
        as_of: Option<NaiveDate>,
    ) -> ForecastResult<Vec<ForecastReport>> {
        let analogs = self.find_analogs(series, as_of)?;
        Ok(horizons
            .iter()
            .map(|h| self.report(&analogs, *h))
            .collect())
    }

    fn find_analogs<'a>(
        &self,
        series: &'a PriceSeries,
        as_of: Option<NaiveDate>,
    ) -> ForecastResult<Analogs<'a>> {
        let corpus = match as_of {
            Some(date) if date < series.last_date() => Cow::Owned(series.as_of(date)?),
            _ => Cow::Borrowed(series),
        };
        let params = self.settings.scan_params();
        let layout = ScanLayout::new(corpus.len(), params.window_len, params.min_gap_days)?;
        let strategy = RetrievalStrategy::select(
            self.settings.retrieval,
            self.settings.two_stage,
            layout.candidate_count(),
        );
        let outcome = scan_with(&corpus, &params, strategy)?;
        let ranked = outcome.matches.len();
        let matches = diversity::filter(
            outcome.matches,
            self.settings.max_per_phase,
            self.settings.max_total,
        );
        tracing::info!(
            asset = %corpus.asset(),
            as_of = %corpus.last_date(),
            strategy = outcome.strategy.label(),
            candidates = outcome.candidates,
            rescored = outcome.rescored,
            ranked,
            kept = matches.len(),
            "analog windows selected"
        );
        Ok(Analogs {
            corpus,
            matches,
            strategy: outcome.strategy,
            candidates: outcome.candidates,
        })
    }

    fn report(&self, analogs: &Analogs<'_>, horizon_days: usize) -> ForecastReport {
        let corpus = analogs.corpus.as_ref();
        let anchor_price = corpus.last_close();
        let distribution = aggregate(&analogs.matches, corpus, horizon_days, anchor_price);
        if distribution.is_empty() {
            tracing::warn!(
                asset = %corpus.asset(),
                horizon_days,
                "forecast has no samples, distribution is flat"
            );
        }
        ForecastReport {
            asset: corpus.asset().to_string(),
            as_of: corpus.last_date(),
            horizon_days,
            anchor_price,
            strategy: analogs.strategy.label().to_string(),
            candidates: analogs.candidates,
            matches: analogs.matches.clone(),
            distribution,
        }
    }
}
