mod aggregator;
mod ring_buffer;

pub use aggregator::aggregate;
pub use ring_buffer::SymbolWindow;

/// Ring buffer capacity: one day of 1-minute bars
pub const WINDOW_CAPACITY: usize = 1440;
