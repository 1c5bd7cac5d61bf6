//! Order amendment: cancel-replace, in place or version bump only.

use super::core::{fatal, SpotMarket};
use super::results::MarketError;
use crate::fee::FeeError;
use crate::order::{Order, OrderAmendment, OrderConfirmation, OrderError, OrderStatus, PeggedReference, TimeInForce};
use crate::types::{IdGenerator, PartyId, Side};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// What an amendment changes, decided once it has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmendStrategy {
    Unchanged,
    CancelReplace,
    InPlace,
}

impl SpotMarket {
    /// Amend one of `party`'s orders.
    pub fn amend_order(&mut self, amendment: &OrderAmendment, party: &PartyId, deterministic_id: &str) -> Result<OrderConfirmation, MarketError> {
        self.id_gen = IdGenerator::new(deterministic_id);
        if self.closed || !self.state.can_trade() {
            return Err(OrderError::MarketClosed.into());
        }
        if amendment.market_id != self.config.market_id {
            return Err(OrderError::InvalidMarketId.into());
        }
        let existing = self.get_order(&amendment.order_id).ok_or(OrderError::OrderNotFound)?;
        if &existing.party != party {
            return Err(OrderError::InvalidPartyId.into());
        }
        if self.liquidity.is_commitment_order(&existing.id) {
            return Err(OrderError::LiquidityCommitmentOrder.into());
        }

        self.validate_order_amendment(&existing, amendment)?;
        let Some(amended) = self.apply_order_amendment(&existing, amendment)? else {
            // nothing left: the amendment is a cancellation
            return self.cancel_order_internal(party, &existing.id);
        };

        let conf = self.amend_validated_order(existing, amended)?;
        if !self.auction.in_auction() {
            self.check_for_reference_moves(false);
        }
        self.trigger_stop_orders();
        Ok(conf)
    }

    /// 8.7.1: time in force and peg rules, then funds for whatever the amendment adds.
    fn validate_order_amendment(&self, existing: &Order, amendment: &OrderAmendment) -> Result<(), OrderError> {
        let nothing = amendment.price.is_none()
            && amendment.size_delta == 0
            && amendment.expires_at.is_none()
            && amendment.time_in_force.is_none()
            && amendment.pegged_offset.is_none()
            && amendment.pegged_reference.is_none();
        if nothing {
            return Err(OrderError::EditNotAllowed);
        }

        if let Some(tif) = amendment.time_in_force {
            match tif {
                TimeInForce::GFA if existing.time_in_force != TimeInForce::GFA => return Err(OrderError::CannotAmendToGfa),
                TimeInForce::GFN if existing.time_in_force != TimeInForce::GFN => return Err(OrderError::CannotAmendToGfn),
                TimeInForce::FOK | TimeInForce::IOC => return Err(OrderError::CannotAmendToFokOrIoc),
                _ => {}
            }
            if tif != existing.time_in_force && matches!(existing.time_in_force, TimeInForce::GFA | TimeInForce::GFN) {
                return Err(OrderError::CannotAmendFromGfaOrGfn);
            }
            if tif == TimeInForce::GTT && amendment.expires_at.is_none() && existing.expires_at.is_none() {
                return Err(OrderError::GttWithoutExpiry);
            }
            if tif != TimeInForce::GTT && amendment.expires_at.is_some() {
                return Err(OrderError::NonGttWithExpiry);
            }
        } else if amendment.expires_at.is_some() && existing.time_in_force != TimeInForce::GTT {
            return Err(OrderError::NonGttWithExpiry);
        }

        if existing.is_pegged() {
            if amendment.price.is_some() {
                return Err(OrderError::CannotAmendPriceOnPeggedOrder);
            }
        } else if amendment.pegged_offset.is_some() || amendment.pegged_reference.is_some() {
            return Err(OrderError::CannotAmendPeggedOrderDetailsOnNonPeggedOrder);
        }
        if let Some(price) = amendment.price {
            if price <= Decimal::ZERO {
                return Err(OrderError::InvalidPrice);
            }
        }
        if amendment.size_delta > 0 || amendment.price.is_some() {
            self.check_amendment_funds(existing, amendment)?;
        }
        Ok(())
    }

    /// The amended order's worst case, less what the order already holds.
    fn check_amendment_funds(&self, existing: &Order, amendment: &OrderAmendment) -> Result<(), OrderError> {
        if existing.status == OrderStatus::Parked {
            return Ok(());
        }
        let price = match amendment.price {
            Some(p) => self.scaling.to_asset_price(p).ok_or(OrderError::InvalidPrice)?,
            None => existing.price,
        };
        let size = (existing.true_remaining() as i64)
            .checked_add(amendment.size_delta)
            .ok_or(OrderError::InvalidSize)?
            .max(0) as u64;
        let mut required = self.amount_by_side(existing.side, price, size).ok_or(OrderError::InvalidSize)?;
        if existing.side == Side::Buy {
            let fee = match self.calculate_fees(&existing.party, size, price, existing.side) {
                Err(FeeError::Overflow(_)) => return Err(OrderError::InvalidSize),
                Err(_) => return Err(OrderError::InsufficientFundsToPayFees),
                Ok(fee) => fee,
            };
            required = required.checked_add(fee).ok_or(OrderError::InvalidSize)?;
        }
        let held = self.holdings.get(&existing.id).map(|r| r.total()).unwrap_or_default();
        if required <= held {
            return Ok(());
        }
        let asset = self.asset_for_side(existing.side);
        self.ledger
            .party_has_sufficient_balance(&existing.party, asset, required - held)
            .map_err(|_| OrderError::InsufficientAssetBalance)
    }

    /// Applies the amendment to a copy. `None` when no size would be left.
    /// Iceberg size changes go through the reserve before the visible size.
    fn apply_order_amendment(&self, existing: &Order, amendment: &OrderAmendment) -> Result<Option<Order>, OrderError> {
        let mut amended = existing.clone();
        amended.version += 1;
        amended.updated_at = Some(self.current_time);

        if let Some(price) = amendment.price {
            amended.original_price = price;
            amended.price = self.scaling.to_asset_price(price).ok_or(OrderError::InvalidPrice)?;
        }

        let delta = amendment.size_delta;
        let size = (existing.size as i64).checked_add(delta).ok_or(OrderError::InvalidSize)?;
        let mut remaining = existing.remaining as i64;
        if let Some(iceberg) = amended.iceberg.as_mut() {
            let mut reserved = iceberg.reserved_remaining as i64;
            if delta >= 0 {
                reserved += delta;
            } else {
                let from_reserve = (-delta).min(reserved);
                reserved -= from_reserve;
                remaining -= -delta - from_reserve;
            }
            iceberg.reserved_remaining = reserved.max(0) as u64;
        } else {
            remaining += delta;
        }
        if size <= 0 || remaining <= 0 {
            return Ok(None);
        }
        amended.size = size as u64;
        amended.remaining = remaining as u64;

        if let Some(tif) = amendment.time_in_force {
            amended.time_in_force = tif;
            if tif != TimeInForce::GTT {
                amended.expires_at = None;
            }
        }
        if let Some(expires_at) = amendment.expires_at {
            if expires_at < existing.created_at {
                return Err(OrderError::InvalidExpirationDatetime);
            }
            amended.expires_at = Some(expires_at);
        }
        if let Some(peg) = amended.pegged.as_mut() {
            if let Some(offset) = amendment.pegged_offset {
                peg.offset = offset;
            }
            if let Some(reference) = amendment.pegged_reference {
                peg.reference = reference;
            }
        }
        self.validate_pegged_offset(&amended)?;
        Ok(Some(amended))
    }

    fn validate_pegged_offset(&self, order: &Order) -> Result<(), OrderError> {
        let Some(peg) = order.pegged else {
            return Ok(());
        };
        match (order.side, peg.reference) {
            (Side::Buy, PeggedReference::BestAsk) => Err(OrderError::PeggedOrderBuyCannotReferenceBestAskPrice),
            (Side::Sell, PeggedReference::BestBid) => Err(OrderError::PeggedOrderSellCannotReferenceBestBidPrice),
            (_, PeggedReference::Mid) if peg.offset <= Decimal::ZERO => Err(OrderError::PeggedOrderOffsetMustBeGreaterThanZero),
            _ if peg.offset < Decimal::ZERO => Err(OrderError::PeggedOrderOffsetMustBeGreaterOrEqualToZero),
            _ => Ok(()),
        }
    }

    fn amend_validated_order(&mut self, existing: Order, mut amended: Order) -> Result<OrderConfirmation, MarketError> {
        if let Some(expires_at) = amended.expires_at {
            if expires_at <= self.current_time {
                return Ok(self.expire_amended_order(existing, amended));
            }
        }

        if existing.status == OrderStatus::Parked {
            return Ok(self.amend_parked_order(existing, amended));
        }

        if amended.is_pegged() && self.reprice_pegged_order(&mut amended).is_err() {
            self.park_order(&existing.id);
            return Ok(self.amend_parked_order(existing, amended));
        }

        let strategy = Self::amend_strategy(&existing, &amended);
        debug!(market = %self.config.market_id, order_id = %existing.id, ?strategy, "amending order");
        let conf = match strategy {
            AmendStrategy::Unchanged => {
                if let Err(e) = self.book.amend_order(&amended) {
                    fatal(&self.config.market_id, "failed to bump order version", e);
                }
                self.emit_order_updated(&amended);
                OrderConfirmation::new(amended)
            }
            AmendStrategy::CancelReplace => self.order_cancel_replace(&existing, amended)?,
            AmendStrategy::InPlace => self.order_amend_in_place(&existing, amended),
        };
        self.update_expiry_index(&existing, &conf.order);
        info!(market = %self.config.market_id, order_id = %conf.order.id, version = conf.order.version, "order amended");
        Ok(conf)
    }

    fn amend_strategy(existing: &Order, amended: &Order) -> AmendStrategy {
        let price_shift = amended.price != existing.price;
        let size_increase = amended.true_remaining() > existing.true_remaining();
        let size_decrease = amended.true_remaining() < existing.true_remaining();
        let expiry_change = amended.expires_at != existing.expires_at;
        let tif_change = amended.time_in_force != existing.time_in_force;

        if price_shift || (size_increase && amended.iceberg.is_none()) {
            AmendStrategy::CancelReplace
        } else if size_decrease || size_increase || expiry_change || tif_change {
            AmendStrategy::InPlace
        } else {
            AmendStrategy::Unchanged
        }
    }

    /// 8.7.2: price changes and size increases lose priority. The new order is
    /// price checked before the old one is touched.
    fn order_cancel_replace(&mut self, existing: &Order, mut amended: Order) -> Result<OrderConfirmation, MarketError> {
        if !self.auction.in_auction() {
            self.check_price_and_get_trades(&amended)?;
        }
        self.release_order_from_holding(existing);
        amended.status = OrderStatus::Active;
        let mut conf = match self.book.replace_order(&existing.id, &mut amended) {
            Ok(conf) => conf,
            Err(e) => fatal(&self.config.market_id, "failed to replace amended order", e),
        };
        self.hold_remaining(&conf.order);
        self.emit_order_updated(&conf.order);
        self.handle_confirmation(&mut conf);
        self.handle_confirmation_passive_orders(&conf);
        Ok(conf)
    }

    /// 8.7.3: size decrease, expiry, time in force or iceberg growth keep priority.
    /// Holding is rebuilt for the new remaining size.
    fn order_amend_in_place(&mut self, existing: &Order, amended: Order) -> OrderConfirmation {
        self.release_order_from_holding(existing);
        if let Err(e) = self.book.amend_order(&amended) {
            fatal(&self.config.market_id, "failed to amend order in place", e);
        }
        self.hold_remaining(&amended);
        self.emit_order_updated(&amended);
        OrderConfirmation::new(amended)
    }

    fn amend_parked_order(&mut self, existing: Order, mut amended: Order) -> OrderConfirmation {
        amended.status = OrderStatus::Parked;
        amended.price = Decimal::ZERO;
        amended.original_price = Decimal::ZERO;
        self.parked.insert(amended.id.clone(), amended.clone());
        self.update_expiry_index(&existing, &amended);
        self.emit_order_updated(&amended);
        OrderConfirmation::new(amended)
    }

    fn expire_amended_order(&mut self, existing: Order, mut amended: Order) -> OrderConfirmation {
        if self.parked.remove(&existing.id).is_none() {
            if let Err(e) = self.book.cancel_order(&existing.id) {
                fatal(&self.config.market_id, "failed to remove expired amended order", e);
            }
            self.release_order_from_holding(&existing);
        }
        if let Some(expires_at) = existing.expires_at {
            self.expiring.remove(&(expires_at, existing.id.clone()));
        }
        amended.status = OrderStatus::Expired;
        self.emit_order_updated(&amended);
        OrderConfirmation::new(amended)
    }

    fn update_expiry_index(&mut self, existing: &Order, amended: &Order) {
        if let Some(expires_at) = existing.expires_at {
            self.expiring.remove(&(expires_at, existing.id.clone()));
        }
        if amended.is_expireable() && !amended.is_finished() {
            if let Some(expires_at) = amended.expires_at {
                self.expiring.insert((expires_at, amended.id.clone()));
            }
        }
    }
}
