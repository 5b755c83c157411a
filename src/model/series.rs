use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};
use crate::model::bar::DailyBar;
use crate::model::window::Window;

/// Ordered daily price history for one asset.
///
/// Dates are strictly increasing. Closes are mirrored into a contiguous
/// buffer so windows can be handed out as index ranges without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    asset: String,
    bars: Vec<DailyBar>,
    closes: Vec<f64>,
}

/// Serialized shape of a series file: `{ "asset": "...", "bars": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeriesFile {
    pub asset: String,
    pub bars: Vec<DailyBar>,
}

impl PriceSeries {
    pub fn new(asset: impl Into<String>, bars: Vec<DailyBar>) -> ForecastResult<Self> {
        let asset = asset.into();
        if bars.is_empty() {
            return Err(ForecastError::InvalidSeries(format!(
                "series for '{}' has no bars",
                asset
            )));
        }
        for pair in bars.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(ForecastError::InvalidSeries(format!(
                    "dates must be strictly increasing: {} followed by {}",
                    pair[0].date, pair[1].date
                )));
            }
        }
        let closes = bars.iter().map(|b| b.close).collect();
        Ok(Self {
            asset,
            bars,
            closes,
        })
    }

    /// Build a series from `(date, close)` pairs.
    pub fn from_closes(
        asset: impl Into<String>,
        points: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> ForecastResult<Self> {
        let bars = points
            .into_iter()
            .map(|(date, close)| DailyBar::from_close(date, close))
            .collect();
        Self::new(asset, bars)
    }

    pub fn from_file(file: PriceSeriesFile) -> ForecastResult<Self> {
        Self::new(file.asset, file.bars)
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[DailyBar] {
        &self.bars
    }

    pub fn closes(&self) -> &[f64] {
        &self.closes
    }

    pub fn date_at(&self, index: usize) -> Option<NaiveDate> {
        self.bars.get(index).map(|b| b.date)
    }

    pub fn first_date(&self) -> NaiveDate {
        self.bars[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.bars[self.bars.len() - 1].date
    }

    pub fn last_close(&self) -> f64 {
        self.closes[self.closes.len() - 1]
    }

    /// Index of the bar dated exactly `date`.
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.bars.binary_search_by_key(&date, |b| b.date).ok()
    }

    /// Window covering `len` bars starting at `start`, if it fits.
    pub fn window(&self, start: usize, len: usize) -> Option<Window> {
        if len == 0 {
            return None;
        }
        let end = start.checked_add(len - 1)?;
        if end >= self.bars.len() {
            return None;
        }
        Some(Window {
            start_index: start,
            end_index: end,
            start_date: self.bars[start].date,
            end_date: self.bars[end].date,
        })
    }

    pub fn window_closes(&self, window: &Window) -> &[f64] {
        &self.closes[window.start_index..=window.end_index]
    }

    /// Prefix of the series ending at the last bar dated on or before `as_of`.
    pub fn as_of(&self, as_of: NaiveDate) -> ForecastResult<PriceSeries> {
        let cut = self.bars.partition_point(|b| b.date <= as_of);
        if cut == 0 {
            return Err(ForecastError::InsufficientData {
                required: 1,
                available: 0,
            });
        }
        Ok(Self {
            asset: self.asset.clone(),
            bars: self.bars[..cut].to_vec(),
            closes: self.closes[..cut].to_vec(),
        })
    }
}
