mod bar;
mod symbol_metrics;
mod timeframe;
mod timeframe_bar;

pub use bar::Bar;
pub use symbol_metrics::{FibonacciPivots, SymbolMetrics, TimeframeSnapshot};
pub use timeframe::Timeframe;
pub use timeframe_bar::TimeframeBar;
