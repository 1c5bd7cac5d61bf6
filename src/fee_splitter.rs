//! Traded value windows feeding the market value proxy.

use crate::types::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeSplitterError {
    #[error("time {current} is before the window start {window_start}")]
    TimeBeforeWindowStart { current: Timestamp, window_start: Timestamp },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplitter {
    time_window_start: Timestamp,
    current_time: Timestamp,
    trade_value: Decimal,
    avg: Decimal,
    window: u64,
}

impl FeeSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current_time(&mut self, now: Timestamp) -> Result<(), FeeSplitterError> {
        if now < self.time_window_start {
            return Err(FeeSplitterError::TimeBeforeWindowStart {
                current: now,
                window_start: self.time_window_start,
            });
        }
        self.current_time = now;
        Ok(())
    }

    /// Closes the running window and opens a new one at `start`.
    pub fn time_window_start(&mut self, start: Timestamp) {
        self.window += 1;
        self.time_window_start = start;
        self.current_time = start;
        self.trade_value = Decimal::ZERO;
    }

    /// Seconds since the current window opened.
    pub fn elapsed(&self) -> i64 {
        self.current_time.secs_since(self.time_window_start)
    }

    /// Saturates at `Decimal::MAX`.
    pub fn add_trade_value(&mut self, value: Decimal) {
        self.trade_value = self.trade_value.saturating_add(value);
    }

    pub fn trade_value(&self) -> Decimal {
        self.trade_value
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Running average over closed windows, folding in the current one.
    pub fn avg_trade_value(&mut self) -> Decimal {
        let mut value = self.trade_value;
        if !self.avg.is_zero() && self.window > 0 {
            let window = Decimal::from(self.window);
            value = (value + self.avg * (window - Decimal::ONE)) / window;
        }
        self.avg = value;
        value
    }

    pub fn market_value_proxy(&self, window_length_secs: i64, total_stake: Decimal) -> Decimal {
        let active = self.elapsed();
        if active <= 0 {
            return total_stake;
        }
        let factor = Decimal::from(window_length_secs) / Decimal::from(active);
        total_stake.max(factor * self.trade_value)
    }

    pub fn state(&self) -> FeeSplitter {
        self.clone()
    }

    pub fn restore(state: FeeSplitter) -> Self {
        state
    }
}
