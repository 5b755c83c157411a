pub mod bar;
pub mod series;
pub mod window;

pub use bar::DailyBar;
pub use series::{PriceSeries, PriceSeriesFile};
pub use window::Window;
