//! Price monitoring.
//!
//! Keeps a volume weighted price history per block and checks every batch of
//! trades against per-trigger bounds derived from a reference price. A breach
//! either rejects a non-persistent order or starts/extends a price monitoring
//! auction.
//!
//! Bound factors come from the risk model through
//! [`PriceMonitor::recalculate_bound_factors`]. Until the first calculation the
//! default factors 0.9/1.1 apply.

use crate::auction::AuctionState;
use crate::order::Trade;
use crate::risk::RangeProvider;
use crate::types::{MarketId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

const SECONDS_PER_YEAR: Decimal = dec!(31557600);
const DEFAULT_DOWN_FACTOR: Decimal = dec!(0.9);
const DEFAULT_UP_FACTOR: Decimal = dec!(1.1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMonitoringTrigger {
    pub horizon_secs: i64,
    /// probability of trading
    pub probability: Decimal,
    pub auction_extension_secs: i64,
}

impl PriceMonitoringTrigger {
    pub fn new(horizon_secs: i64, probability: Decimal, auction_extension_secs: i64) -> Self {
        Self {
            horizon_secs,
            probability,
            auction_extension_secs,
        }
    }

    pub fn year_fraction(&self) -> Decimal {
        Decimal::from(self.horizon_secs) / SECONDS_PER_YEAR
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMonitoringSettings {
    pub triggers: Vec<PriceMonitoringTrigger>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceMonitorError {
    #[error("no reference price available")]
    NoReferencePrice,
    #[error("bound factor count {got} does not match trigger count {expected}")]
    BoundFactorMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub active: bool,
    pub up_factor: Decimal,
    pub down_factor: Decimal,
    pub trigger: PriceMonitoringTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastPrice {
    pub time: Timestamp,
    pub volume_weighted_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPrice {
    pub price: Decimal,
    pub volume: u64,
}

/// Valid range for one trigger. Min is rounded up and max down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub reference_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMonitoringBounds {
    pub min_valid_price: Decimal,
    pub max_valid_price: Decimal,
    pub trigger: PriceMonitoringTrigger,
    pub reference_price: Decimal,
}

/// Output of the bound factor calculation, one entry per trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundFactors {
    pub up: Vec<Decimal>,
    pub down: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMonitorState {
    pub market_id: MarketId,
    pub initialised: bool,
    pub now: Timestamp,
    pub update: Timestamp,
    pub prices_now: Vec<CurrentPrice>,
    pub prices_past: Vec<PastPrice>,
    pub bounds: Vec<Bound>,
    pub bound_factors_initialised: bool,
    pub min_duration_secs: i64,
}

/** 3.0: price monitor. one per market */
#[derive(Debug)]
pub struct PriceMonitor {
    market_id: MarketId,
    risk_model: Box<dyn RangeProvider>,
    min_duration_secs: i64,
    initialised: bool,
    horizons: BTreeMap<i64, Decimal>,
    now: Timestamp,
    update: Timestamp,
    prices_now: Vec<CurrentPrice>,
    prices_past: Vec<PastPrice>,
    bounds: Vec<Bound>,
    bound_factors_initialised: bool,
}

fn bounds_and_horizons(settings: &PriceMonitoringSettings) -> (BTreeMap<i64, Decimal>, Vec<Bound>) {
    let mut triggers = settings.triggers.clone();
    triggers.sort_by(|a, b| a.horizon_secs.cmp(&b.horizon_secs).then(b.probability.cmp(&a.probability)));
    let mut horizons = BTreeMap::new();
    let bounds = triggers
        .into_iter()
        .map(|trigger| {
            horizons.entry(trigger.horizon_secs).or_insert_with(|| trigger.year_fraction());
            Bound {
                active: true,
                up_factor: DEFAULT_UP_FACTOR,
                down_factor: DEFAULT_DOWN_FACTOR,
                trigger,
            }
        })
        .collect();
    (horizons, bounds)
}

impl PriceMonitor {
    pub fn new(market_id: MarketId, risk_model: Box<dyn RangeProvider>, settings: &PriceMonitoringSettings, min_duration_secs: i64) -> Self {
        let (horizons, bounds) = bounds_and_horizons(settings);
        Self {
            market_id,
            risk_model,
            min_duration_secs,
            initialised: false,
            horizons,
            now: Timestamp::default(),
            update: Timestamp::default(),
            prices_now: Vec::new(),
            prices_past: Vec::new(),
            bounds,
            bound_factors_initialised: false,
        }
    }

    pub fn update_settings(&mut self, risk_model: Box<dyn RangeProvider>, settings: &PriceMonitoringSettings) {
        let (horizons, bounds) = bounds_and_horizons(settings);
        self.risk_model = risk_model;
        self.horizons = horizons;
        self.bounds = bounds;
        self.initialised = false;
        self.bound_factors_initialised = false;
    }

    pub fn set_min_duration(&mut self, secs: i64) {
        self.min_duration_secs = secs;
    }

    pub fn initialised(&self) -> bool {
        self.initialised
    }

    pub fn bound_factors_initialised(&self) -> bool {
        self.bound_factors_initialised
    }

    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    /// Horizons of all triggers as year fractions, ascending.
    pub fn horizon_year_fractions(&self) -> Vec<Decimal> {
        let mut fractions: Vec<Decimal> = self.horizons.values().copied().collect();
        fractions.sort();
        fractions
    }

    fn no_history(&self) -> bool {
        self.prices_past.is_empty() && self.prices_now.is_empty()
    }

    /// 3.1: closes the current block's prices into a volume weighted past price.
    pub fn on_time_update(&mut self, now: Timestamp) {
        if now < self.now {
            error!(market = %self.market_id, now = %now, last = %self.now, "price monitor received a time before the last one");
            panic!("price monitor time moved backwards: {} < {}", now, self.now);
        }
        if now == self.now {
            return;
        }
        if let Some(volume_weighted_price) = volume_weighted_price(&self.prices_now) {
            self.prices_past.push(PastPrice {
                time: self.now,
                volume_weighted_price,
            });
        }
        self.prices_now.clear();
        self.now = now;
        self.clear_stale_prices();
    }

    /// 3.2: checks trades against the bounds and moves the auction state.
    /// Returns true when a non-persistent order must be rejected instead.
    pub fn check_price(&mut self, auction: &mut AuctionState, trades: &[Trade], persistent: bool) -> bool {
        let was_initialised = self.initialised;
        if !was_initialised {
            if trades.is_empty() {
                return false;
            }
            if self.no_history() || auction.is_opening_auction() {
                self.reset_price_history(trades);
            }
            self.initialised = true;
        }

        let fba = auction.is_fba();
        if !auction.in_auction() || fba {
            let breached = self.check_bounds(trades, auction);
            if breached.is_empty() {
                if was_initialised {
                    self.record_price_changes(trades);
                }
                return false;
            }
            if !persistent {
                self.reactivate_bounds();
                return true;
            }
            let mut duration: i64 = breached.iter().map(|t| t.auction_extension_secs).sum();
            if fba && auction.can_leave() {
                auction.extend_auction_price(duration);
                return false;
            }
            duration = duration.max(self.min_duration_secs);
            info!(market = %self.market_id, duration, "price bounds breached, starting price monitoring auction");
            auction.start_price_auction(self.now, duration);
            return false;
        }

        if auction.is_opening_auction() {
            self.reset_price_history(trades);
            return false;
        }

        let breached = self.check_bounds(trades, auction);
        if breached.is_empty() {
            if auction.is_price_auction() || auction.is_price_extension() {
                let Some(end) = auction.expires_at() else {
                    return false;
                };
                if self.now <= end {
                    return false;
                }
                auction.set_ready_to_leave();
                self.reset_price_history(trades);
                return false;
            }
            if auction.can_leave() {
                self.reactivate_bounds();
            }
            return false;
        }

        let duration: i64 = breached.iter().map(|t| t.auction_extension_secs).sum();
        debug!(market = %self.market_id, duration, "price bounds breached during auction, extending");
        auction.extend_auction_price(duration);
        false
    }

    /// Drops history and starts over from `trades`. With no trades only the
    /// most recent past price is kept.
    pub fn reset_price_history(&mut self, trades: &[Trade]) {
        self.update = self.now;
        if !trades.is_empty() {
            self.prices_now = trades
                .iter()
                .map(|t| CurrentPrice {
                    price: t.price,
                    volume: t.size,
                })
                .collect();
            self.prices_past.clear();
        } else if let Some(last) = self.prices_past.last().copied() {
            self.prices_past = vec![last];
        } else {
            self.initialised = false;
            return;
        }
        self.reactivate_bounds();
    }

    fn reactivate_bounds(&mut self) {
        for b in &mut self.bounds {
            b.active = true;
        }
    }

    fn record_price_changes(&mut self, trades: &[Trade]) {
        for t in trades.iter().filter(|t| t.size > 0) {
            self.prices_now.push(CurrentPrice {
                price: t.price,
                volume: t.size,
            });
        }
    }

    /// Keeps only prices needed by the longest horizon, and at least one.
    fn clear_stale_prices(&mut self) {
        if self.now < self.update || self.prices_past.is_empty() {
            return;
        }
        let Some(max_horizon) = self.bounds.last().map(|b| b.trigger.horizon_secs) else {
            return;
        };
        let min_required = self.now.sub_secs(max_horizon);
        let last = self.prices_past.len() - 1;
        let keep_from = self.prices_past[..last]
            .iter()
            .position(|p| p.time >= min_required)
            .unwrap_or(last);
        self.prices_past.drain(..keep_from);
    }

    /// Latest volume weighted price at or before `now - horizon`.
    fn reference_price(&self, horizon_secs: i64) -> Decimal {
        let lookback = self.now.sub_secs(horizon_secs);
        let Some(first) = self.prices_past.first() else {
            return self.prices_now.first().map(|p| p.price).unwrap_or_default();
        };
        let mut reference = first.volume_weighted_price;
        for p in &self.prices_past {
            if p.time > lookback {
                break;
            }
            reference = p.volume_weighted_price;
        }
        reference
    }

    fn most_recent_observation(&self) -> Option<Timestamp> {
        if !self.prices_now.is_empty() {
            Some(self.now)
        } else {
            self.prices_past.last().map(|p| p.time)
        }
    }

    /// Ranges of active bounds, plus indices of bounds gone stale in a monitoring auction.
    fn price_ranges(&self, monitoring_auction: bool) -> (Vec<(usize, PriceRange)>, Vec<usize>) {
        let mut ranges = Vec::with_capacity(self.bounds.len());
        let mut stale = Vec::new();
        if self.no_history() {
            return (ranges, stale);
        }
        for (i, b) in self.bounds.iter().enumerate() {
            if !b.active {
                continue;
            }
            if monitoring_auction {
                let lookback = self.now.sub_secs(b.trigger.horizon_secs);
                if self.most_recent_observation().is_some_and(|t| t < lookback) {
                    stale.push(i);
                    continue;
                }
            }
            let reference = self.reference_price(b.trigger.horizon_secs);
            let (down, up) = if self.bound_factors_initialised {
                (b.down_factor, b.up_factor)
            } else {
                (DEFAULT_DOWN_FACTOR, DEFAULT_UP_FACTOR)
            };
            ranges.push((
                i,
                PriceRange {
                    min_price: (reference * down).ceil(),
                    max_price: (reference * up).floor(),
                    reference_price: reference,
                },
            ));
        }
        (ranges, stale)
    }

    /// Deactivates every breached bound and returns its trigger.
    fn check_bounds(&mut self, trades: &[Trade], auction: &AuctionState) -> Vec<PriceMonitoringTrigger> {
        let mut breached = Vec::new();
        if trades.is_empty() {
            return breached;
        }
        let (ranges, stale) = self.price_ranges(auction.is_monitoring_auction());
        for i in stale {
            self.bounds[i].active = false;
        }
        for t in trades.iter().filter(|t| t.size > 0) {
            for (i, range) in &ranges {
                let bound = &mut self.bounds[*i];
                if !bound.active {
                    continue;
                }
                if t.price < range.min_price || t.price > range.max_price {
                    breached.push(bound.trigger);
                    bound.active = false;
                }
            }
        }
        breached
    }

    /// 3.3: widest price range that trips no active bound.
    pub fn get_valid_price_range(&self, auction: &AuctionState) -> (Decimal, Decimal) {
        let mut min = Decimal::ZERO;
        let mut max = Decimal::MAX;
        for (_, range) in self.price_ranges(auction.is_monitoring_auction()).0 {
            min = min.max(range.min_price);
            if !range.max_price.is_zero() {
                max = max.min(range.max_price);
            }
        }
        (min, max)
    }

    pub fn get_current_bounds(&self, auction: &AuctionState) -> Vec<PriceMonitoringBounds> {
        let mut out: Vec<PriceMonitoringBounds> = self
            .price_ranges(auction.is_monitoring_auction())
            .0
            .into_iter()
            .map(|(i, range)| PriceMonitoringBounds {
                min_valid_price: range.min_price,
                max_valid_price: range.max_price,
                trigger: self.bounds[i].trigger,
                reference_price: range.reference_price,
            })
            .collect();
        out.sort_by(|a, b| {
            a.trigger
                .horizon_secs
                .cmp(&b.trigger.horizon_secs)
                .then(a.trigger.probability.cmp(&b.trigger.probability))
        });
        out
    }

    /// 3.4: risk model ranges divided by the reference price, per trigger.
    pub fn calculate_bound_factors(&self) -> Result<BoundFactors, PriceMonitorError> {
        if self.no_history() {
            return Err(PriceMonitorError::NoReferencePrice);
        }
        let mut factors = BoundFactors::default();
        for b in &self.bounds {
            let reference = self.reference_price(b.trigger.horizon_secs);
            if reference.is_zero() {
                return Err(PriceMonitorError::NoReferencePrice);
            }
            let fraction = self.horizons.get(&b.trigger.horizon_secs).copied().unwrap_or_else(|| b.trigger.year_fraction());
            let (min, max) = self.risk_model.price_range(reference, fraction, b.trigger.probability);
            factors.down.push(min / reference);
            factors.up.push(max / reference);
        }
        Ok(factors)
    }

    pub fn update_bound_factors(&mut self, factors: &BoundFactors) -> Result<(), PriceMonitorError> {
        let expected = self.bounds.len();
        if factors.up.len() != expected || factors.down.len() != expected {
            return Err(PriceMonitorError::BoundFactorMismatch {
                expected,
                got: factors.up.len().min(factors.down.len()),
            });
        }
        for (b, (up, down)) in self.bounds.iter_mut().zip(factors.up.iter().zip(&factors.down)) {
            b.up_factor = *up;
            b.down_factor = *down;
        }
        self.bound_factors_initialised = true;
        Ok(())
    }

    /// Computes and applies the bound factors in one step.
    pub fn recalculate_bound_factors(&mut self) -> Result<(), PriceMonitorError> {
        let factors = self.calculate_bound_factors()?;
        self.update_bound_factors(&factors)?;
        debug!(market = %self.market_id, ?factors, "price bound factors updated");
        Ok(())
    }

    pub fn state(&self) -> PriceMonitorState {
        PriceMonitorState {
            market_id: self.market_id.clone(),
            initialised: self.initialised,
            now: self.now,
            update: self.update,
            prices_now: self.prices_now.clone(),
            prices_past: self.prices_past.clone(),
            bounds: self.bounds.clone(),
            bound_factors_initialised: self.bound_factors_initialised,
            min_duration_secs: self.min_duration_secs,
        }
    }

    pub fn restore(state: PriceMonitorState, risk_model: Box<dyn RangeProvider>) -> Self {
        let horizons = state
            .bounds
            .iter()
            .map(|b| (b.trigger.horizon_secs, b.trigger.year_fraction()))
            .collect();
        Self {
            market_id: state.market_id,
            risk_model,
            min_duration_secs: state.min_duration_secs,
            initialised: state.initialised,
            horizons,
            now: state.now,
            update: state.update,
            prices_now: state.prices_now,
            prices_past: state.prices_past,
            bounds: state.bounds,
            bound_factors_initialised: state.bound_factors_initialised,
        }
    }
}

/// `None` without volume. Sums that do not fit fall back to a running mean.
fn volume_weighted_price(prices: &[CurrentPrice]) -> Option<Decimal> {
    let mut weighted = Some(Decimal::ZERO);
    let mut volume = Decimal::ZERO;
    let mut running = Decimal::ZERO;
    for p in prices {
        if p.volume == 0 {
            continue;
        }
        let v = Decimal::from(p.volume);
        volume += v;
        weighted = weighted.and_then(|w| w.checked_add(v.checked_mul(p.price)?));
        running += (p.price - running) * (v / volume);
    }
    if volume.is_zero() {
        return None;
    }
    Some(weighted.map_or(running, |w| w / volume))
}
