//! Trade handling: fees, holding releases and spot transfers for every match.

use super::core::{fatal, SpotMarket};
use crate::collateral::LedgerMovement;
use crate::events::{EventPayload, TradeEvent};
use crate::fee::{FeeError, FeesTransfer};
use crate::order::{Order, OrderConfirmation, OrderError, OrderStatus, Trade};
use crate::types::{PartyId, Side, TradeId};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::slice;
use tracing::{debug, error};

impl SpotMarket {
    /// 8.3: fee mode follows the auction state. None in the opening auction.
    pub(super) fn calculate_fees_for_trades(&self, trades: &mut [Trade]) -> Result<Option<FeesTransfer>, FeeError> {
        let fees = if !self.auction.in_auction() {
            self.fee.calculate_for_continuous_mode(trades, &self.fee_services)?
        } else if self.auction.is_monitoring_auction() {
            self.fee.calculate_for_auction_mode(trades, &self.fee_services)?
        } else if self.auction.is_fba() {
            self.fee.calculate_for_frequent_batches_auction_mode(trades, &self.fee_services)?
        } else if !self.auction.is_opening_auction() {
            self.fee.calculate_for_auction_mode(trades, &self.fee_services)?
        } else {
            return Ok(None);
        };
        Ok(Some(fees))
    }

    /// Worst-case fee `party` pays for trading `size` at `price` right now.
    pub(super) fn calculate_fees(&self, party: &PartyId, size: u64, price: Decimal, side: Side) -> Result<Decimal, FeeError> {
        if self.auction.is_opening_auction() || size == 0 {
            return Ok(Decimal::ZERO);
        }
        let mut trade = self.worst_case_trade(party, size, price, side);
        let fees = self.calculate_fees_for_trades(slice::from_mut(&mut trade))?;
        Ok(fees.map(|f| f.total_for(party)).unwrap_or_default())
    }

    /// Fee `party` would pay in a non-opening auction, whatever the current mode.
    pub(super) fn calculate_auction_fees(&self, party: &PartyId, size: u64, price: Decimal, side: Side) -> Result<Decimal, FeeError> {
        if size == 0 {
            return Ok(Decimal::ZERO);
        }
        let mut trade = self.worst_case_trade(party, size, price, side);
        let fees = self.fee.calculate_for_auction_mode(slice::from_mut(&mut trade), &self.fee_services)?;
        Ok(fees.total_for(party))
    }

    fn worst_case_trade(&self, party: &PartyId, size: u64, price: Decimal, side: Side) -> Trade {
        let batch = self.book.batch_id();
        let (buyer, seller) = match side {
            Side::Buy => (party.clone(), PartyId::default()),
            Side::Sell => (PartyId::default(), party.clone()),
        };
        Trade {
            id: TradeId::default(),
            market_id: self.config.market_id.clone(),
            price,
            market_price: price.checked_div(self.scaling.price_factor).unwrap_or_default(),
            size,
            buyer,
            seller,
            buy_order: Default::default(),
            sell_order: Default::default(),
            aggressor: Some(side),
            timestamp: self.current_time,
            buyer_fee: None,
            seller_fee: None,
            buyer_auction_batch: batch,
            seller_auction_batch: batch,
        }
    }

    /// Buys need notional plus fees in quote, sells the base quantity. An
    /// amount too large to represent is an invalid size, not a funds check.
    pub(super) fn check_sufficient_funds(&self, party: &PartyId, side: Side, price: Decimal, size: u64, pegged: bool) -> Result<(), OrderError> {
        let asset = self.asset_for_side(side);
        let mut required = self.amount_by_side(side, price, size).ok_or(OrderError::InvalidSize)?;
        if side == Side::Buy && !pegged {
            let fee = match self.calculate_fees(party, size, price, side) {
                Err(FeeError::Overflow(_)) => return Err(OrderError::InvalidSize),
                Err(_) => return Err(OrderError::InsufficientFundsToPayFees),
                Ok(fee) => fee,
            };
            required = required.checked_add(fee).ok_or(OrderError::InvalidSize)?;
        }
        self.ledger
            .party_has_sufficient_balance(party, asset, required)
            .map_err(|_| OrderError::InsufficientAssetBalance)
    }

    /// 8.4: moves what a resting order needs into holding. Buys resting in an
    /// auction also hold the auction fee.
    pub(super) fn transfer_to_holding_account(&mut self, order: &Order) {
        let Some(amount) = self.amount_by_side(order.side, order.price, order.true_remaining()) else {
            fatal(&self.config.market_id, "holding amount overflows for a validated order", &order.id);
        };
        let fee = if order.is_buy() && self.auction.in_auction() {
            match self.calculate_fees(&order.party, order.true_remaining(), order.price, order.side) {
                Ok(fee) => fee,
                Err(e) => fatal(&self.config.market_id, "failed to compute auction fee for holding", e),
            }
        } else {
            Decimal::ZERO
        };
        let asset = self.asset_for_side(order.side).clone();
        let movement = match self
            .holdings
            .transfer_to_holding_account(self.ledger.as_mut(), &order.id, &order.party, &asset, amount, fee)
        {
            Ok(movement) => movement,
            Err(e) => fatal(&self.config.market_id, "failed to transfer funds to holding account", e),
        };
        self.emit_movements(vec![movement]);
    }

    /// Holds the remainder of an order that ended up resting.
    pub(super) fn hold_remaining(&mut self, order: &Order) {
        if !order.is_finished() && order.true_remaining() > 0 {
            self.transfer_to_holding_account(order);
        }
    }

    pub(super) fn release_order_from_holding(&mut self, order: &Order) {
        let asset = self.asset_for_side(order.side).clone();
        match self
            .holdings
            .release_all_from_holding_account(self.ledger.as_mut(), &order.id, &order.party, &asset)
        {
            Ok(Some(movement)) => self.emit_movements(vec![movement]),
            Ok(None) => {}
            Err(e) => fatal(&self.config.market_id, "failed to release funds from holding account", e),
        }
    }

    /// 8.2: single funnel for matching outcomes. Assigns trade ids, settles each
    /// trade and releases the aggressive order's funds once it is done.
    pub(super) fn handle_confirmation(&mut self, conf: &mut OrderConfirmation) {
        if conf.order.is_pegged() && (conf.order.true_remaining() == 0 || conf.order.status != OrderStatus::Active) {
            let order = conf.order.clone();
            self.remove_pegged(&order);
        }
        if conf.order.is_expireable() && conf.order.is_finished() {
            if let Some(expires_at) = conf.order.expires_at {
                self.expiring.remove(&(expires_at, conf.order.id.clone()));
            }
        }
        if conf.trades.is_empty() {
            return;
        }

        let mut movements = Vec::new();
        let mut traded_value = Decimal::ZERO;
        for trade in conf.trades.iter_mut() {
            trade.id = TradeId::from(self.next_id());
            let Some(value) = self.scaling.quote_notional(trade.size, trade.price) else {
                fatal(&self.config.market_id, "trade value overflows", &trade.id);
            };
            traded_value += value;
            movements.extend(self.handle_trade(trade));
            self.last_traded_price = Some(trade.price);
        }
        if conf.order.is_finished() {
            let order = conf.order.clone();
            self.release_order_from_holding(&order);
        }
        self.emit_movements(movements);
        self.fee_splitter.add_trade_value(traded_value);

        for trade in &conf.trades {
            self.emit_event(EventPayload::Trade(TradeEvent { trade: trade.clone() }));
        }
    }

    pub(super) fn handle_confirmation_passive_orders(&mut self, conf: &OrderConfirmation) {
        self.handle_passive_orders(&conf.passive_orders_affected);
    }

    /// Passive side of an uncrossing. A sell matched against several buys shows
    /// up in several confirmations but is handled once.
    pub(super) fn handle_uncrossed_passive_orders(&mut self, confirmations: &[OrderConfirmation]) {
        let mut seen = BTreeSet::new();
        let passive: Vec<Order> = confirmations
            .iter()
            .flat_map(|c| c.passive_orders_affected.iter())
            .filter(|o| seen.insert(o.id.clone()))
            .cloned()
            .collect();
        self.handle_passive_orders(&passive);
    }

    fn handle_passive_orders(&mut self, orders: &[Order]) {
        for order in orders {
            let mut order = order.clone();
            order.updated_at = Some(self.current_time);
            self.emit_order_updated(&order);
            if order.is_pegged() && (order.true_remaining() == 0 || order.status != OrderStatus::Active) {
                self.remove_pegged(&order);
            }
            if order.is_finished() {
                self.release_order_from_holding(&order);
                if let Some(expires_at) = order.expires_at {
                    self.expiring.remove(&(expires_at, order.id.clone()));
                }
            }
        }
    }

    /// Releases the traded part from holding, swaps base and quote, then charges fees.
    fn handle_trade(&mut self, trade: &mut Trade) -> Vec<LedgerMovement> {
        let market = self.config.market_id.clone();
        let fees = match self.calculate_fees_for_trades(slice::from_mut(trade)) {
            Ok(fees) => fees,
            Err(e) => fatal(&market, "failed to compute trade fees", e),
        };
        let quote = self.config.quote_asset.clone();
        let base = self.config.base_asset.clone();
        let (Some(quote_amount), Some(base_amount)) = (self.scaling.quote_notional(trade.size, trade.price), self.scaling.base_quantity(trade.size)) else {
            fatal(&market, "trade amounts overflow", &trade.id);
        };

        let mut movements = Vec::new();
        let releases = match trade.aggressor {
            // uncrossing: both sides were resting
            None => {
                let buyer_fee = fees.as_ref().map(|f| f.total_for(&trade.buyer)).unwrap_or_default();
                let fee_release = buyer_fee.min(self.holdings.held_fee(&trade.buy_order));
                vec![
                    (trade.buy_order.clone(), trade.buyer.clone(), quote.clone(), quote_amount, fee_release),
                    (trade.sell_order.clone(), trade.seller.clone(), base.clone(), base_amount, Decimal::ZERO),
                ]
            }
            Some(Side::Sell) => vec![(trade.buy_order.clone(), trade.buyer.clone(), quote.clone(), quote_amount, Decimal::ZERO)],
            Some(Side::Buy) => vec![(trade.sell_order.clone(), trade.seller.clone(), base.clone(), base_amount, Decimal::ZERO)],
        };
        for (order_id, party, asset, quantity, fee) in releases {
            match self
                .holdings
                .release_quantity_holding_account(self.ledger.as_mut(), &order_id, &party, &asset, quantity, fee)
            {
                Ok(movement) => movements.push(movement),
                Err(e) => fatal(&market, "failed to release traded funds from holding account", e),
            }
        }

        match self.ledger.transfer_spot(&trade.seller, &trade.buyer, &base, base_amount) {
            Ok(movement) => movements.push(movement),
            Err(e) => fatal(&market, "failed to transfer base asset to buyer", e),
        }
        match self.ledger.transfer_spot(&trade.buyer, &trade.seller, &quote, quote_amount) {
            Ok(movement) => movements.push(movement),
            Err(e) => fatal(&market, "failed to transfer quote asset to seller", e),
        }

        if let Some(fees) = fees {
            movements.extend(self.apply_fees(&fees));
        }
        debug!(market = %market, buyer = %trade.buyer, seller = %trade.seller, size = trade.size, price = %trade.price, "trade settled");
        movements
    }

    /// An unpayable fee batch moves nothing and is not recorded.
    fn apply_fees(&mut self, fees: &FeesTransfer) -> Vec<LedgerMovement> {
        match self
            .ledger
            .transfer_spot_fees(&self.config.market_id, &self.config.quote_asset, fees.transfers())
        {
            Ok(movements) => {
                self.fee.record(fees);
                movements
            }
            Err(e) => {
                error!(market = %self.config.market_id, error = %e, "failed to collect trade fees");
                Vec::new()
            }
        }
    }
}
