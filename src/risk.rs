//! Risk model seam used by price monitoring.
//!
//! The statistical model itself lives outside this crate. Price monitoring only
//! needs the valid range around a reference price for a horizon and a
//! probability of trading.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Probabilistic price range provider.
pub trait RangeProvider: std::fmt::Debug + Send {
    /// Returns `(min, max)` around `price` for the given year fraction and probability.
    fn price_range(&self, price: Decimal, year_fraction: Decimal, probability: Decimal) -> (Decimal, Decimal);
}

/// Fixed fractional moves, independent of horizon and probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRiskModel {
    /// max fractional move up (0.1 = 10%)
    pub max_move_up: Decimal,
    /// max fractional move down
    pub min_move_down: Decimal,
}

impl SimpleRiskModel {
    pub fn new(max_move_up: Decimal, min_move_down: Decimal) -> Self {
        Self {
            max_move_up,
            min_move_down,
        }
    }
}

impl Default for SimpleRiskModel {
    fn default() -> Self {
        Self::new(Decimal::new(1, 1), Decimal::new(1, 1))
    }
}

impl RangeProvider for SimpleRiskModel {
    fn price_range(&self, price: Decimal, _year_fraction: Decimal, _probability: Decimal) -> (Decimal, Decimal) {
        let min = price * (Decimal::ONE - self.min_move_down);
        let max = price * (Decimal::ONE + self.max_move_up);
        (min.max(Decimal::ZERO), max)
    }
}
