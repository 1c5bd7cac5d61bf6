//! Pegged order pricing, parking and repricing on reference moves.

use super::core::{fatal, SpotMarket};
use crate::order::{Order, OrderError, OrderStatus, PeggedReference};
use crate::types::{OrderId, Side};
use rust_decimal::Decimal;
use tracing::debug;

/// Static best bid and ask the pegged orders were last priced against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReferencePrices {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}

impl SpotMarket {
    fn reference_prices(&self) -> ReferencePrices {
        ReferencePrices {
            best_bid: self.book.best_static_bid_price_and_volume().map(|(p, _)| p),
            best_ask: self.book.best_static_ask_price_and_volume().map(|(p, _)| p),
        }
    }

    /// Buy mid rounds up half a tick, sell mid rounds down.
    fn static_mid_price(&self, side: Side) -> Option<Decimal> {
        let refs = self.reference_prices();
        let (bid, ask) = (refs.best_bid?, refs.best_ask?);
        let sum = bid.checked_add(ask)?;
        let mid = match side {
            Side::Buy => sum.checked_add(self.scaling.price_factor)? / Decimal::TWO,
            Side::Sell => sum / Decimal::TWO,
        };
        Some(mid.floor())
    }

    /// 8.5: asset-decimals price for a pegged order at the current references.
    pub(super) fn get_new_pegged_price(&self, order: &Order) -> Result<Decimal, OrderError> {
        if self.auction.in_auction() {
            return Err(OrderError::UnableToRepricePeggedOrder);
        }
        let peg = order.pegged.ok_or(OrderError::UnableToRepricePeggedOrder)?;
        let refs = self.reference_prices();
        let reference = match peg.reference {
            PeggedReference::Mid => self.static_mid_price(order.side),
            PeggedReference::BestBid => refs.best_bid,
            PeggedReference::BestAsk => refs.best_ask,
        }
        .ok_or(OrderError::UnableToRepricePeggedOrder)?;

        let offset = self
            .scaling
            .to_asset_price(peg.offset)
            .ok_or(OrderError::UnableToRepricePeggedOrder)?;
        match order.side {
            Side::Sell => reference.checked_add(offset).ok_or(OrderError::UnableToRepricePeggedOrder),
            Side::Buy => {
                if reference <= offset {
                    return Err(OrderError::UnableToRepricePeggedOrder);
                }
                Ok(reference - offset)
            }
        }
    }

    pub(super) fn reprice_pegged_order(&self, order: &mut Order) -> Result<(), OrderError> {
        let price = self.get_new_pegged_price(order)?;
        order.price = price;
        order.original_price = price
            .checked_div(self.scaling.price_factor)
            .ok_or(OrderError::UnableToRepricePeggedOrder)?
            .floor();
        Ok(())
    }

    /// Takes a live order off the book and parks it, releasing its funds.
    pub(super) fn park_order(&mut self, order_id: &OrderId) {
        let mut order = match self.book.cancel_order(order_id) {
            Ok(order) => order,
            Err(e) => fatal(&self.config.market_id, "failed to remove pegged order from the book", e),
        };
        self.release_order_from_holding(&order);
        order.status = OrderStatus::Parked;
        order.updated_at = Some(self.current_time);
        debug!(market = %self.config.market_id, order_id = %order.id, "pegged order parked");
        self.emit_order_updated(&order);
        self.parked.insert(order.id.clone(), order);
    }

    pub(super) fn park_all_pegged_orders(&mut self) {
        for order_id in self.book.get_active_pegged_order_ids() {
            self.park_order(&order_id);
        }
    }

    /// Forgets a pegged order that reached a terminal state.
    pub(super) fn remove_pegged(&mut self, order: &Order) {
        self.parked.remove(&order.id);
        if let Some(expires_at) = order.expires_at {
            self.expiring.remove(&(expires_at, order.id.clone()));
        }
    }

    /// 8.6: reprices live pegged orders and unparks parked ones when the best
    /// static bid or ask moved. `force` reprices even without a move.
    pub(super) fn check_for_reference_moves(&mut self, force: bool) {
        if self.auction.in_auction() || self.closed {
            return;
        }
        let current = self.reference_prices();
        if !force && self.last_reference == Some(current) {
            return;
        }
        self.last_reference = Some(current);

        for order_id in self.book.get_active_pegged_order_ids() {
            self.reprice_live_pegged(&order_id);
        }

        let parked: Vec<OrderId> = self.parked.keys().cloned().collect();
        for order_id in parked {
            self.unpark(&order_id);
        }

        // fills while unparking can move the references again
        self.last_reference = Some(self.reference_prices());
    }

    fn reprice_live_pegged(&mut self, order_id: &OrderId) {
        let Some(existing) = self.book.get_order_by_id(order_id).cloned() else {
            return;
        };
        let mut amended = existing.clone();
        if self.reprice_pegged_order(&mut amended).is_err() {
            self.park_order(order_id);
            return;
        }
        if amended.price == existing.price {
            return;
        }

        self.release_order_from_holding(&existing);
        if !self.can_fund(&amended) {
            if let Err(e) = self.book.cancel_order(order_id) {
                fatal(&self.config.market_id, "failed to remove unfunded pegged order", e);
            }
            self.stop_unfunded_pegged(amended);
            return;
        }

        amended.version += 1;
        amended.updated_at = Some(self.current_time);
        let mut conf = match self.book.replace_order(order_id, &mut amended) {
            Ok(conf) => conf,
            Err(e) => fatal(&self.config.market_id, "failed to reprice pegged order", e),
        };
        self.hold_remaining(&conf.order);
        self.emit_order_updated(&conf.order);
        self.handle_confirmation(&mut conf);
        self.handle_confirmation_passive_orders(&conf);
    }

    fn unpark(&mut self, order_id: &OrderId) {
        let Some(mut order) = self.parked.get(order_id).cloned() else {
            return;
        };
        if self.reprice_pegged_order(&mut order).is_err() {
            return;
        }
        if !self.can_fund(&order) {
            self.stop_unfunded_pegged(order);
            return;
        }

        self.parked.remove(order_id);
        order.status = OrderStatus::Active;
        order.updated_at = Some(self.current_time);
        let mut conf = match self.book.submit_order(&mut order) {
            Ok(conf) => conf,
            Err(e) => fatal(&self.config.market_id, "failed to unpark pegged order", e),
        };
        debug!(market = %self.config.market_id, order_id = %order.id, price = %order.price, "pegged order unparked");
        self.hold_remaining(&conf.order);
        self.emit_order_updated(&conf.order);
        self.handle_confirmation(&mut conf);
        self.handle_confirmation_passive_orders(&conf);
    }

    /// Whether the party's general account covers the order at its current price.
    fn can_fund(&self, order: &Order) -> bool {
        let asset = self.asset_for_side(order.side);
        self.amount_by_side(order.side, order.price, order.true_remaining())
            .is_some_and(|required| self.ledger.party_has_sufficient_balance(&order.party, asset, required).is_ok())
    }

    fn stop_unfunded_pegged(&mut self, mut order: Order) {
        self.remove_pegged(&order);
        order.status = OrderStatus::Stopped;
        order.reason = Some(OrderError::InsufficientAssetBalance);
        order.updated_at = Some(self.current_time);
        debug!(market = %self.config.market_id, order_id = %order.id, "pegged order stopped, party cannot fund the new price");
        self.emit_order_updated(&order);
    }
}
