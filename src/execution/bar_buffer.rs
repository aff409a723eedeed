use crate::models::PriceBar;
use std::collections::VecDeque;

/// In-memory rolling window of bars for the traded instrument
///
/// Bars are kept in strictly increasing timestamp order; anything at or
/// before the latest buffered bar is discarded.
#[derive(Debug, Clone)]
pub struct BarBuffer {
    bars: VecDeque<PriceBar>,
    max_bars: usize,
}

impl BarBuffer {
    /// Create a new bar buffer
    ///
    /// # Arguments
    /// * `max_bars` - Maximum number of bars to keep
    pub fn new(max_bars: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(max_bars),
            max_bars,
        }
    }

    /// Add a bar, removing the oldest if the buffer is full
    ///
    /// Returns false if the bar was discarded as out of order.
    pub fn push(&mut self, bar: PriceBar) -> bool {
        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                tracing::warn!(
                    symbol = %bar.symbol,
                    timestamp = %bar.timestamp,
                    last = %last.timestamp,
                    "Discarding out-of-order bar"
                );
                return false;
            }
        }

        self.bars.push_back(bar);

        // Remove oldest if exceeds max
        while self.bars.len() > self.max_bars {
            self.bars.pop_front();
        }

        true
    }

    /// All buffered bars, oldest first
    pub fn bars(&self) -> Vec<PriceBar> {
        self.bars.iter().cloned().collect()
    }

    /// The N most recent bars, oldest first
    pub fn recent(&self, n: usize) -> Vec<PriceBar> {
        self.bars.iter().rev().take(n).rev().cloned().collect()
    }

    pub fn latest(&self) -> Option<&PriceBar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_bars
    }
}
