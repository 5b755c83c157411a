use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trading day of an asset's price history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl DailyBar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
        }
    }

    /// Bar with every price set to `close`, for series that only carry closes.
    pub fn from_close(date: NaiveDate, close: f64) -> Self {
        Self::new(date, close, close, close, close)
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    pub fn has_valid_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn from_close_fills_ohlc() {
        let bar = DailyBar::from_close(day(2), 101.5);
        assert!((bar.open - 101.5).abs() < f64::EPSILON);
        assert!((bar.high - 101.5).abs() < f64::EPSILON);
        assert!((bar.low - 101.5).abs() < f64::EPSILON);
        assert!(bar.is_bullish());
    }

    #[test]
    fn bearish_bar() {
        let bar = DailyBar::new(day(3), 100.0, 105.0, 90.0, 95.0);
        assert!(!bar.is_bullish());
        assert!(bar.has_valid_close());
    }

    #[test]
    fn non_positive_close_is_not_valid() {
        assert!(!DailyBar::from_close(day(4), 0.0).has_valid_close());
        assert!(!DailyBar::from_close(day(4), f64::NAN).has_valid_close());
    }
}
