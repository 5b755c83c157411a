use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Contiguous index range into a [`PriceSeries`](crate::model::series::PriceSeries).
///
/// Both ends are inclusive. A window never owns price data; it is resolved
/// against the series it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start_index: usize,
    pub end_index: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Window {
    /// Number of bars covered; always at least one.
    pub fn bar_count(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    /// Trading days between this window's last bar and `later_start`.
    pub fn gap_before(&self, later_start: usize) -> usize {
        later_start.saturating_sub(self.end_index)
    }
}
