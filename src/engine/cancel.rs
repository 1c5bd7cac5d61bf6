//! Order cancellation, single and bulk.

use super::core::{fatal, SpotMarket};
use super::results::MarketError;
use crate::order::{Order, OrderConfirmation, OrderError, OrderStatus};
use crate::types::{IdGenerator, OrderId, PartyId};
use std::collections::BTreeSet;
use tracing::info;

impl SpotMarket {
    /// Cancel one of `party`'s orders, on the book or parked.
    pub fn cancel_order(&mut self, party: &PartyId, order_id: &OrderId, deterministic_id: &str) -> Result<OrderConfirmation, MarketError> {
        self.id_gen = IdGenerator::new(deterministic_id);
        if self.closed {
            return Err(OrderError::MarketClosed.into());
        }
        let conf = self.cancel_order_internal(party, order_id)?;
        if !self.auction.in_auction() {
            self.check_for_reference_moves(false);
        }
        Ok(conf)
    }

    /// Cancels every order `party` has, except those backing a liquidity commitment.
    pub fn cancel_all_orders(&mut self, party: &PartyId, deterministic_id: &str) -> Result<Vec<OrderConfirmation>, MarketError> {
        self.id_gen = IdGenerator::new(deterministic_id);
        if self.closed {
            return Err(OrderError::MarketClosed.into());
        }
        let ids: BTreeSet<OrderId> = self
            .book
            .orders_for_party(party)
            .into_iter()
            .map(|o| o.id)
            .chain(self.parked.values().filter(|o| &o.party == party).map(|o| o.id.clone()))
            .filter(|id| !self.liquidity.is_commitment_order(id))
            .collect();

        let mut confirmations = Vec::with_capacity(ids.len());
        for order_id in &ids {
            confirmations.push(self.cancel_order_internal(party, order_id)?);
        }
        info!(market = %self.config.market_id, party = %party, count = confirmations.len(), "cancelled all orders for party");
        if !self.auction.in_auction() {
            self.check_for_reference_moves(false);
        }
        Ok(confirmations)
    }

    pub(super) fn cancel_order_internal(&mut self, party: &PartyId, order_id: &OrderId) -> Result<OrderConfirmation, MarketError> {
        let owner = self
            .get_order(order_id)
            .map(|o| o.party)
            .ok_or(OrderError::OrderNotFound)?;
        if &owner != party {
            return Err(OrderError::InvalidPartyId.into());
        }
        let order = self
            .remove_order(order_id, OrderStatus::Cancelled)
            .ok_or(OrderError::OrderNotFound)?;
        Ok(OrderConfirmation::new(order))
    }

    /// Takes an order off the book (or out of the parked set), releases what it
    /// holds and publishes it with its final `status`.
    pub(super) fn remove_order(&mut self, order_id: &OrderId, status: OrderStatus) -> Option<Order> {
        let mut order = match self.parked.remove(order_id) {
            Some(order) => order,
            None => {
                self.book.get_order_by_id(order_id)?;
                let order = match self.book.cancel_order(order_id) {
                    Ok(order) => order,
                    Err(e) => fatal(&self.config.market_id, "failed to remove order from the book", e),
                };
                self.release_order_from_holding(&order);
                order
            }
        };
        if let Some(expires_at) = order.expires_at {
            self.expiring.remove(&(expires_at, order.id.clone()));
        }
        order.status = status;
        order.updated_at = Some(self.current_time);
        self.emit_order_updated(&order);
        Some(order)
    }
}
