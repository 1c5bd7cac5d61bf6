//! Order submission and validation.

use super::core::{fatal, SpotMarket};
use super::results::MarketError;
use crate::events::EventPayload;
use crate::order::{
    IcebergOrder, Order, OrderConfirmation, OrderError, OrderStatus, OrderSubmission, OrderType, PeggedReference, TimeInForce, Trade,
};
use crate::types::{IdGenerator, OrderId, PartyId, Side};
use rust_decimal::Decimal;
use tracing::{debug, info};

impl SpotMarket {
    /// Submit an order on behalf of `party`. `deterministic_id` roots every id
    /// the submission creates: the order id first, then trade ids.
    pub fn submit_order(&mut self, submission: &OrderSubmission, party: &PartyId, deterministic_id: &str) -> Result<OrderConfirmation, MarketError> {
        self.id_gen = IdGenerator::new(deterministic_id);
        let order_id = OrderId::from(self.next_id());
        let conf = self.submit_order_with_id(submission, party, order_id)?;
        if !self.auction.in_auction() {
            self.check_for_reference_moves(false);
        }
        self.trigger_stop_orders();
        Ok(conf)
    }

    pub(super) fn submit_order_with_id(&mut self, submission: &OrderSubmission, party: &PartyId, order_id: OrderId) -> Result<OrderConfirmation, MarketError> {
        let mut order = Order {
            id: order_id,
            market_id: submission.market_id.clone(),
            party: party.clone(),
            side: submission.side,
            // a price that cannot be scaled fails validation as zero
            price: self.scaling.to_asset_price(submission.price).unwrap_or_default(),
            original_price: submission.price,
            size: submission.size,
            remaining: submission.size,
            time_in_force: submission.time_in_force,
            order_type: submission.order_type,
            status: OrderStatus::Active,
            reason: None,
            created_at: self.current_time,
            updated_at: None,
            expires_at: submission.expires_at,
            version: 1,
            batch_id: 0,
            pegged: submission.pegged,
            iceberg: submission.iceberg.map(|opts| IcebergOrder {
                peak_size: opts.peak_size,
                minimum_visible_size: opts.minimum_visible_size,
                reserved_remaining: 0,
            }),
            post_only: submission.post_only,
        };
        if order.is_pegged() {
            order.price = Decimal::ZERO;
            order.original_price = Decimal::ZERO;
        }

        if self.closed || !self.state.can_trade() {
            return Err(self.reject_order(order, OrderError::MarketClosed));
        }
        if let Err(reason) = self.validate_order(&order) {
            return Err(self.reject_order(order, reason));
        }
        if let Err(reason) = self.validate_accounts(&mut order) {
            return Err(self.reject_order(order, reason));
        }

        let conf = self.submit_validated_order(order)?;
        if conf.order.is_expireable() && !conf.order.is_finished() {
            if let Some(expires_at) = conf.order.expires_at {
                self.expiring.insert((expires_at, conf.order.id.clone()));
            }
        }
        Ok(conf)
    }

    /// 8.2.1: time in force against the trading mode, expiry, type and pegs.
    fn validate_order(&self, order: &Order) -> Result<(), OrderError> {
        let in_auction = self.auction.in_auction();
        match order.time_in_force {
            TimeInForce::GFN if in_auction => return Err(OrderError::GfnOrderDuringAuction),
            TimeInForce::IOC if in_auction => return Err(OrderError::IocOrderDuringAuction),
            TimeInForce::FOK if in_auction => return Err(OrderError::FokOrderDuringAuction),
            TimeInForce::GFA if !in_auction => return Err(OrderError::GfaOrderDuringContinuousTrading),
            _ => {}
        }

        match (order.time_in_force, order.expires_at) {
            (TimeInForce::GTT, None) => return Err(OrderError::GttWithoutExpiry),
            (TimeInForce::GTT, Some(expires_at)) if expires_at < order.created_at => {
                return Err(OrderError::InvalidExpirationDatetime)
            }
            (tif, Some(_)) if tif != TimeInForce::GTT => return Err(OrderError::NonGttWithExpiry),
            _ => {}
        }

        if order.order_type == OrderType::Network {
            return Err(OrderError::InvalidType);
        }
        if order.market_id != self.config.market_id {
            return Err(OrderError::InvalidMarketId);
        }
        if order.size == 0 {
            return Err(OrderError::InvalidSize);
        }
        if !order.is_pegged() && order.price <= Decimal::ZERO {
            return Err(OrderError::InvalidPrice);
        }
        if let Some(iceberg) = order.iceberg {
            if iceberg.peak_size == 0 || iceberg.minimum_visible_size == 0 || iceberg.peak_size < iceberg.minimum_visible_size {
                return Err(OrderError::InvalidIcebergParameters);
            }
        }
        if order.is_pegged() {
            self.validate_pegged_order(order)?;
        }
        Ok(())
    }

    fn validate_pegged_order(&self, order: &Order) -> Result<(), OrderError> {
        let Some(peg) = order.pegged else {
            return Ok(());
        };
        if !matches!(order.time_in_force, TimeInForce::GTC | TimeInForce::GTT) {
            return Err(OrderError::PeggedOrderMustBeGttOrGtc);
        }
        if order.iceberg.is_some() {
            return Err(OrderError::PeggedIcebergNotSupported);
        }
        match (order.side, peg.reference) {
            (Side::Buy, PeggedReference::BestAsk) => return Err(OrderError::PeggedOrderBuyCannotReferenceBestAskPrice),
            (Side::Sell, PeggedReference::BestBid) => return Err(OrderError::PeggedOrderSellCannotReferenceBestBidPrice),
            _ => {}
        }
        if peg.reference == PeggedReference::Mid && peg.offset <= Decimal::ZERO {
            return Err(OrderError::PeggedOrderOffsetMustBeGreaterThanZero);
        }
        if peg.offset < Decimal::ZERO {
            return Err(OrderError::PeggedOrderOffsetMustBeGreaterOrEqualToZero);
        }
        Ok(())
    }

    /// 8.2.2: the party must hold the side's asset and afford the worst case.
    fn validate_accounts(&mut self, order: &mut Order) -> Result<(), OrderError> {
        let asset = self.asset_for_side(order.side).clone();
        if !self.ledger.has_general_account(&order.party, &asset) {
            return Err(OrderError::MissingGeneralAccount);
        }
        // an unpriceable pegged order is parked later, without funds
        let priced = !order.is_pegged() || (!self.auction.in_auction() && self.reprice_pegged_order(order).is_ok());
        if priced {
            self.check_sufficient_funds(&order.party, order.side, order.price, order.true_remaining(), order.is_pegged())?;
        }
        // the quote account receives proceeds of a sell and pays fees
        let other = self.asset_for_side(order.side.opposite()).clone();
        self.ledger.create_party_general_account(&order.party, &other);
        self.parties.insert(order.party.clone());
        Ok(())
    }

    pub(super) fn reject_order(&mut self, mut order: Order, reason: OrderError) -> MarketError {
        order.updated_at = Some(self.current_time);
        order.reject(reason);
        debug!(market = %self.config.market_id, order_id = %order.id, party = %order.party, %reason, "order rejected");
        self.emit_order_updated(&order);
        MarketError::Order(reason)
    }

    /// 8.2.3: pegged orders park in auction or when they cannot be priced;
    /// everything else is price checked and goes to the book.
    fn submit_validated_order(&mut self, mut order: Order) -> Result<OrderConfirmation, MarketError> {
        if order.is_pegged() && (self.auction.in_auction() || self.reprice_pegged_order(&mut order).is_err()) {
            return Ok(self.park_new_order(order));
        }

        if !self.auction.in_auction() {
            if let Err(reason) = self.check_price_and_get_trades(&order) {
                return Err(self.reject_order(order, reason));
            }
            // a price auction may just have started
            if order.is_pegged() && self.auction.in_auction() {
                return Ok(self.park_new_order(order));
            }
        }

        order.status = OrderStatus::Active;
        let mut conf = match self.book.submit_order(&mut order) {
            Ok(conf) => conf,
            Err(e) => fatal(&self.config.market_id, "matching book refused a validated order", e),
        };
        self.hold_remaining(&conf.order);
        info!(market = %self.config.market_id, order_id = %conf.order.id, party = %conf.order.party, side = ?conf.order.side, size = conf.order.size, status = ?conf.order.status, "order submitted");
        self.emit_order_updated(&conf.order);
        self.handle_confirmation(&mut conf);
        self.handle_confirmation_passive_orders(&conf);
        Ok(conf)
    }

    fn park_new_order(&mut self, mut order: Order) -> OrderConfirmation {
        order.status = OrderStatus::Parked;
        order.price = Decimal::ZERO;
        order.original_price = Decimal::ZERO;
        debug!(market = %self.config.market_id, order_id = %order.id, "pegged order parked on entry");
        self.emit_order_updated(&order);
        self.parked.insert(order.id.clone(), order.clone());
        OrderConfirmation::new(order)
    }

    /// Trades the order would make, after post-only and price bound checks.
    /// A bound breach from a persistent order starts an auction instead, in
    /// which case nothing trades.
    pub(super) fn check_price_and_get_trades(&mut self, order: &Order) -> Result<Vec<Trade>, OrderError> {
        let trades = self.book.get_trades(order);
        if order.post_only && !trades.is_empty() {
            return Err(OrderError::PostOnlyOrderWouldTrade);
        }
        let persistent = order.time_in_force.is_persistent();
        if self.price_monitor.check_price(&mut self.auction, &trades, persistent) {
            return Err(OrderError::NonPersistentOrderOutOfPriceBounds);
        }
        if let Some(event) = self.auction.auction_extended(self.current_time) {
            self.emit_event(EventPayload::Auction(event));
        }
        if self.auction.auction_start() {
            self.enter_auction();
            return Ok(Vec::new());
        }
        Ok(trades)
    }
}
