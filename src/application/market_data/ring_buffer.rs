use crate::domain::market::Bar;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

/// Fixed-capacity ring of the most recent 1-minute bars for one symbol.
///
/// Single writer (the metrics engine), any number of readers. Readers get
/// copy-on-read snapshots so a concurrent append can never tear a view.
/// Appends are O(1); wrap-around evicts the oldest bar transparently.
pub struct SymbolWindow {
    inner: RwLock<VecDeque<Bar>>,
    capacity: usize,
}

impl SymbolWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a bar, evicting the oldest when at capacity.
    ///
    /// Bars must arrive in `close_time` order per symbol; an out-of-order or
    /// duplicate bar is rejected and `false` returned so the caller can count
    /// the drop.
    pub fn append(&self, bar: Bar) -> bool {
        let mut bars = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = bars.back()
            && bar.close_time <= last.close_time
        {
            return false;
        }
        if bars.len() == self.capacity {
            bars.pop_front();
        }
        bars.push_back(bar);
        true
    }

    /// The last `k` bars in insertion order. Returns the available prefix
    /// when fewer than `k` are held.
    pub fn tail(&self, k: usize) -> Vec<Bar> {
        let bars = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let start = bars.len().saturating_sub(k);
        bars.iter().skip(start).cloned().collect()
    }

    /// Snapshot of the entire window in insertion order
    pub fn snapshot(&self) -> Vec<Bar> {
        self.tail(self.capacity)
    }

    pub fn last(&self) -> Option<Bar> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
