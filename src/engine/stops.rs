//! Stop orders: the market side.
//!
//! A pooled stop holds no funds. Once the last traded price crosses its
//! trigger, its order goes through the normal submission path and is funded
//! and validated like any other order. Triggering is re-run until the pool
//! stops firing, since a triggered order can itself move the price.

use super::core::SpotMarket;
use super::results::MarketError;
use crate::events::{EventPayload, StopOrderUpdatedEvent};
use crate::order::OrderConfirmation;
use crate::stop_orders::{StopExpiryStrategy, StopOrder, StopOrderError, StopOrderStatus, StopOrders, StopOrdersSubmission, StopTrigger};
use crate::types::{IdGenerator, OrderId, PartyId, StopOrderId};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl SpotMarket {
    /// Submit a stop order or an OCO pair. `deterministic_id` roots the stop
    /// ids, falls below first, then the id of an order submitted straight away
    /// when the last traded price is already past a trigger.
    pub fn submit_stop_orders(
        &mut self,
        submission: &StopOrdersSubmission,
        party: &PartyId,
        deterministic_id: &str,
    ) -> Result<Option<OrderConfirmation>, MarketError> {
        self.id_gen = IdGenerator::new(deterministic_id);
        let falls_below_id = StopOrderId::from(self.next_id());
        let rises_above_id = StopOrderId::from(self.next_id());
        let now = self.current_time;
        let mut legs = submission.clone().into_stop_orders(party, falls_below_id, rises_above_id, now);

        if let Err(reason) = self.validate_stop_orders(party, &mut legs) {
            for leg in legs.iter_mut() {
                leg.reject(reason, now);
            }
            debug!(market = %self.config.market_id, %party, %reason, "stop orders rejected");
            self.emit_stop_orders(legs);
            return Err(reason.into());
        }
        let triggered = match self.last_traded_price {
            Some(price) if !self.auction.in_auction() => legs.iter().position(|leg| leg.would_trigger(price)),
            _ => None,
        };
        let Some(index) = triggered else {
            for leg in &legs {
                info!(market = %self.config.market_id, stop_id = %leg.id, %party, direction = ?leg.direction, "stop order pooled");
            }
            self.emit_stop_orders(legs.clone());
            for leg in legs {
                self.stop_orders.insert(leg);
            }
            return Ok(None);
        };

        for (i, leg) in legs.iter_mut().enumerate() {
            leg.status = if i == index { StopOrderStatus::Triggered } else { StopOrderStatus::Stopped };
            leg.updated_at = Some(now);
        }
        let order_id = OrderId::from(self.next_id());
        legs[index].order_id = Some(order_id.clone());
        let submission = legs[index].submission.clone();
        self.emit_stop_orders(legs);
        info!(market = %self.config.market_id, %party, %order_id, "stop order triggered on submission");

        let conf = self.submit_order_with_id(&submission, party, order_id)?;
        if !self.auction.in_auction() {
            self.check_for_reference_moves(false);
        }
        self.trigger_stop_orders();
        Ok(Some(conf))
    }

    /// Cancels one stop order, and its OCO sibling with it.
    pub fn cancel_stop_order(&mut self, party: &PartyId, stop_id: &StopOrderId) -> Result<Vec<StopOrder>, MarketError> {
        self.cancel_stops(party, Some(stop_id))
    }

    /// Cancels every stop order `party` has in this market.
    pub fn cancel_all_stop_orders(&mut self, party: &PartyId) -> Result<Vec<StopOrder>, MarketError> {
        self.cancel_stops(party, None)
    }

    pub fn stop_orders(&self) -> &StopOrders {
        &self.stop_orders
    }

    fn cancel_stops(&mut self, party: &PartyId, stop_id: Option<&StopOrderId>) -> Result<Vec<StopOrder>, MarketError> {
        if self.closed || !self.state.can_trade() {
            return Err(StopOrderError::TradingNotAllowed.into());
        }
        let cancelled = self.stop_orders.cancel(party, stop_id, self.current_time)?;
        debug!(market = %self.config.market_id, %party, count = cancelled.len(), "stop orders cancelled");
        self.emit_stop_orders(cancelled.clone());
        Ok(cancelled)
    }

    /// Market state, accounts and the per party cap, then each leg's trigger
    /// and expiry. Fixed trigger prices are moved into asset decimals.
    fn validate_stop_orders(&self, party: &PartyId, legs: &mut [StopOrder]) -> Result<(), StopOrderError> {
        if legs.is_empty() {
            return Err(StopOrderError::EmptySubmission);
        }
        if self.auction.is_opening_auction() {
            return Err(StopOrderError::NotAllowedDuringOpeningAuction);
        }
        if self.closed || !self.state.can_trade() {
            return Err(StopOrderError::TradingNotAllowed);
        }
        if self.stop_orders.count_for_party(party) + legs.len() > self.config.max_stop_orders_per_party {
            return Err(StopOrderError::MaxStopOrdersPerPartyReached);
        }
        let now = self.current_time;
        for leg in legs.iter_mut() {
            if leg.market_id != self.config.market_id {
                return Err(StopOrderError::InvalidMarketId);
            }
            if !self.ledger.has_general_account(party, self.asset_for_side(leg.submission.side)) {
                return Err(StopOrderError::MissingGeneralAccount);
            }
            if leg.expires_at.is_some_and(|at| at < now) {
                return Err(StopOrderError::ExpiryInThePast);
            }
            match leg.trigger {
                StopTrigger::Price(price) if price > Decimal::ZERO => {
                    let asset_price = self.scaling.to_asset_price(price).ok_or(StopOrderError::InvalidTrigger)?;
                    leg.trigger = StopTrigger::Price(asset_price);
                }
                StopTrigger::TrailingPercentOffset(offset) if offset > Decimal::ZERO && offset < Decimal::ONE => {
                    leg.trail_reference = self.last_traded_price;
                }
                _ => return Err(StopOrderError::InvalidTrigger),
            }
        }
        Ok(())
    }

    /// Fires stops against the last traded price until none fire. Waits
    /// while the market is in auction.
    pub(super) fn trigger_stop_orders(&mut self) {
        loop {
            if self.auction.in_auction() || self.closed || self.stop_orders.is_empty() {
                return;
            }
            let Some(price) = self.last_traded_price else {
                return;
            };
            let (triggered, stopped) = self.stop_orders.price_updated(price, self.current_time);
            if triggered.is_empty() {
                return;
            }
            debug!(market = %self.config.market_id, %price, triggered = triggered.len(), stopped = stopped.len(), "stop orders triggered");
            self.emit_stop_orders(stopped);
            self.submit_stop_order_submissions(triggered);
        }
    }

    /// Expired stops go, submitting their order when asked to. OCO legs
    /// never submit on expiry.
    pub(super) fn remove_expired_stop_orders(&mut self) {
        if self.closed || !self.state.can_trade() {
            return;
        }
        let expired = self.stop_orders.remove_expired(self.current_time);
        if expired.is_empty() {
            return;
        }
        let (submit, dropped): (Vec<_>, Vec<_>) = expired
            .into_iter()
            .partition(|o| o.expiry_strategy == StopExpiryStrategy::Submit && o.oco_link.is_none());
        debug!(market = %self.config.market_id, submitted = submit.len(), dropped = dropped.len(), "stop orders expired");
        self.emit_stop_orders(dropped);
        self.submit_stop_order_submissions(submit);
    }

    /// Used when the market closes.
    pub(super) fn cancel_every_stop_order(&mut self) {
        let cancelled = self.stop_orders.cancel_every_order(self.current_time);
        self.emit_stop_orders(cancelled);
    }

    /// Submits each stop's order in turn. A refused order is logged and the
    /// stop keeps the id it was given.
    fn submit_stop_order_submissions(&mut self, stops: Vec<StopOrder>) {
        for mut stop in stops {
            let order_id = OrderId::from(self.next_id());
            stop.order_id = Some(order_id.clone());
            if let Err(e) = self.submit_order_with_id(&stop.submission, &stop.party, order_id) {
                warn!(market = %self.config.market_id, stop_id = %stop.id, error = %e, "could not submit stop order");
            }
            if !self.auction.in_auction() {
                self.check_for_reference_moves(false);
            }
            self.emit_stop_orders(vec![stop]);
        }
    }

    fn emit_stop_orders(&mut self, stops: Vec<StopOrder>) {
        for stop in stops {
            self.emit_event(EventPayload::StopOrderUpdated(StopOrderUpdatedEvent { stop_order: stop }));
        }
    }
}
