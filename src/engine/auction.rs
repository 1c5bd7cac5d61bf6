// 8.8 engine/auction.rs: entering and leaving auctions, plus the governance
// transitions that move the market's lifecycle state.

use super::core::{fatal, SpotMarket};
use super::results::MarketError;
use crate::auction::{AuctionTrigger, MarketState};
use crate::events::EventPayload;
use crate::order::OrderStatus;
use crate::types::{Side, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl SpotMarket {
    /// 8.8.1: book into auction mode. On a fresh auction GFN orders go, pegged
    /// orders park and resting buys move their auction fee into holding.
    pub(super) fn enter_auction(&mut self) {
        let already = self.book.in_auction();
        let to_cancel = self.book.enter_auction();
        let event = self.auction.auction_started(self.current_time);

        if !already {
            for order in to_cancel {
                if self.remove_order(&order.id, OrderStatus::Cancelled).is_none() {
                    debug!(market = %self.config.market_id, order_id = %order.id, "GFN order already gone when entering auction");
                }
            }
            self.park_all_pegged_orders();
            self.process_fees_transfers_on_enter_auction();
        }

        if let Some(event) = event {
            info!(market = %self.config.market_id, trigger = ?event.trigger, end = ?event.end, "entered auction");
            self.emit_event(EventPayload::Auction(event));
        }
        if self.auction.is_price_auction() {
            self.set_state(MarketState::Suspended);
        }
    }

    /// Buys that cannot cover their auction fee are cancelled.
    fn process_fees_transfers_on_enter_auction(&mut self) {
        let quote = self.config.quote_asset.clone();
        let parties: Vec<_> = self.parties.iter().cloned().collect();
        let mut movements = Vec::new();
        let mut to_cancel = Vec::new();

        for party in &parties {
            for order in self.book.orders_for_party(party) {
                if order.side != Side::Buy || self.holdings.held_fee(&order.id) > Decimal::ZERO {
                    continue;
                }
                let fee = match self.calculate_fees(party, order.true_remaining(), order.price, order.side) {
                    Ok(fee) => fee,
                    Err(e) => {
                        warn!(market = %self.config.market_id, order_id = %order.id, error = %e, "failed to compute auction fee");
                        to_cancel.push(order.id.clone());
                        continue;
                    }
                };
                if fee.is_zero() {
                    continue;
                }
                if self.ledger.party_has_sufficient_balance(party, &quote, fee).is_err() {
                    debug!(market = %self.config.market_id, order_id = %order.id, %fee, "party cannot cover auction fee");
                    to_cancel.push(order.id.clone());
                    continue;
                }
                match self
                    .holdings
                    .transfer_fee_to_holding_account(self.ledger.as_mut(), &order.id, party, &quote, fee)
                {
                    Ok(Some(movement)) => movements.push(movement),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(market = %self.config.market_id, order_id = %order.id, error = %e, "failed to hold auction fee");
                        to_cancel.push(order.id.clone());
                    }
                }
            }
        }
        self.emit_movements(movements);
        for order_id in to_cancel {
            self.remove_order(&order_id, OrderStatus::Cancelled);
        }
    }

    /// 8.8.2: uncross, drop GFA orders, release auction fees and go back to the
    /// default mode. A batch default starts the next batch.
    pub(super) fn leave_auction(&mut self, now: Timestamp) {
        let was_opening = self.auction.is_opening_auction();
        let (mut confirmations, to_cancel) = self.book.leave_auction(now);
        for conf in confirmations.iter_mut() {
            self.handle_confirmation(conf);
            self.emit_order_updated(&conf.order);
        }
        self.handle_uncrossed_passive_orders(&confirmations);

        for order in to_cancel {
            if self.remove_order(&order.id, OrderStatus::Cancelled).is_none() {
                fatal(&self.config.market_id, "GFA order vanished before it could be cancelled", &order.id);
            }
        }

        if !was_opening {
            self.process_fees_release_on_leave_auction();
        }

        let event = self.auction.left(now);
        if matches!(
            self.state,
            MarketState::Pending | MarketState::Suspended | MarketState::SuspendedViaGovernance
        ) {
            self.set_state(MarketState::Active);
        }
        if let Err(e) = self.fee.set_liquidity_fee(self.config.fee_factors.liquidity_fee) {
            warn!(market = %self.config.market_id, error = %e, "failed to refresh liquidity fee");
        }
        if let Err(e) = self.price_monitor.recalculate_bound_factors() {
            debug!(market = %self.config.market_id, error = %e, "bound factors not recalculated on leaving auction");
        }
        if was_opening {
            self.equity_shares.opening_auction_ended();
            self.fee_splitter.time_window_start(now);
        }
        if let Some(event) = event {
            info!(market = %self.config.market_id, trades = confirmations.iter().map(|c| c.trades.len()).sum::<usize>(), "left auction");
            self.emit_event(EventPayload::Auction(event));
        }

        if self.auction.auction_start() {
            self.enter_auction();
        } else {
            self.check_for_reference_moves(true);
        }
    }

    fn process_fees_release_on_leave_auction(&mut self) {
        let quote = self.config.quote_asset.clone();
        let parties: Vec<_> = self.parties.iter().cloned().collect();
        let mut movements = Vec::new();
        for party in &parties {
            for order in self.book.orders_for_party(party) {
                if order.side != Side::Buy || self.holdings.held_fee(&order.id).is_zero() {
                    continue;
                }
                match self
                    .holdings
                    .release_fee_from_holding_account(self.ledger.as_mut(), &order.id, party, &quote)
                {
                    Ok(movement) => movements.push(movement),
                    Err(e) => fatal(&self.config.market_id, "failed to release auction fee from holding account", e),
                }
            }
        }
        self.emit_movements(movements);
    }

    /// 8.8.3: runs on every tick while in auction.
    pub(super) fn check_auction(&mut self, now: Timestamp) {
        if !self.auction.in_auction() {
            return;
        }
        let expired = self.auction.expires_at().is_some_and(|end| now >= end);

        if self.auction.is_opening_auction() {
            if !expired {
                return;
            }
            let trades = self.book.get_indicative_trades();
            if trades.is_empty() {
                self.extend_opening_auction(now);
                return;
            }
            if !self.price_monitor.bound_factors_initialised() {
                self.price_monitor.check_price(&mut self.auction, &trades, true);
                if let Err(e) = self.price_monitor.recalculate_bound_factors() {
                    debug!(market = %self.config.market_id, error = %e, "opening auction cannot leave without bound factors");
                }
            }
            if !self.price_monitor.bound_factors_initialised() {
                self.extend_opening_auction(now);
                return;
            }
            self.auction.set_ready_to_leave();
            self.leave_auction(now);
            return;
        }

        if self.auction.is_governance_suspension() {
            if self.auction.can_leave() {
                self.leave_auction(now);
            }
            return;
        }

        if self.auction.is_price_auction() || self.auction.is_price_extension() {
            let trades = self.book.get_indicative_trades();
            self.price_monitor.check_price(&mut self.auction, &trades, true);
            if let Some(event) = self.auction.auction_extended(now) {
                self.emit_event(EventPayload::Auction(event));
            }
        } else if expired {
            if self.auction.is_fba() {
                self.auction.set_ready_to_leave();
                let trades = self.book.get_indicative_trades();
                self.price_monitor.check_price(&mut self.auction, &trades, true);
                if let Some(event) = self.auction.auction_extended(now) {
                    self.emit_event(EventPayload::Auction(event));
                }
            } else if self.auction.is_automated_purchase_auction() {
                self.auction.set_ready_to_leave();
            }
        }

        if self.auction.can_leave() {
            self.leave_auction(now);
        }
    }

    fn extend_opening_auction(&mut self, now: Timestamp) {
        let delta = self.config.auction_min_duration_secs.max(1);
        self.auction.extend_auction(AuctionTrigger::Opening, delta);
        if let Some(event) = self.auction.auction_extended(now) {
            debug!(market = %self.config.market_id, end = ?event.end, "opening auction extended");
            self.emit_event(EventPayload::Auction(event));
        }
    }

    /// Proposed market goes live: into its opening auction, or straight into
    /// its default mode.
    pub fn start_opening_auction(&mut self) -> Result<(), MarketError> {
        if self.state != MarketState::Proposed {
            return Err(MarketError::InvalidState {
                state: self.state,
                operation: "start the opening auction",
            });
        }
        if self.auction.is_opening_auction() {
            self.set_state(MarketState::Pending);
        } else {
            self.set_state(MarketState::Active);
            self.equity_shares.opening_auction_ended();
            self.fee_splitter.time_window_start(self.current_time);
        }
        if self.auction.auction_start() {
            self.enter_auction();
        }
        Ok(())
    }

    /// Rejects a market that never opened.
    pub fn reject(&mut self) -> Result<(), MarketError> {
        if self.state != MarketState::Proposed {
            return Err(MarketError::InvalidState {
                state: self.state,
                operation: "reject",
            });
        }
        self.closed = true;
        self.auction.close();
        self.set_state(MarketState::Rejected);
        Ok(())
    }

    /// Governance suspension. Trading continues as an auction until resumed.
    pub fn suspend(&mut self) -> Result<(), MarketError> {
        if self.closed || !matches!(self.state, MarketState::Active | MarketState::Suspended | MarketState::Pending) {
            return Err(MarketError::InvalidState {
                state: self.state,
                operation: "suspend",
            });
        }
        self.auction.start_governance_suspension(self.current_time);
        self.enter_auction();
        self.set_state(MarketState::SuspendedViaGovernance);
        Ok(())
    }

    /// Lifts a governance suspension. The next tick uncrosses and leaves.
    pub fn resume(&mut self) -> Result<(), MarketError> {
        if self.state != MarketState::SuspendedViaGovernance {
            return Err(MarketError::InvalidState {
                state: self.state,
                operation: "resume",
            });
        }
        self.auction.end_governance_suspension()?;
        Ok(())
    }

    /// Ends trading for good. A running auction other than the opening one is
    /// uncrossed first; every remaining order is cancelled and its funds released.
    pub fn terminate(&mut self, final_state: MarketState) -> Result<(), MarketError> {
        if !matches!(final_state, MarketState::Settled | MarketState::Cancelled) {
            return Err(MarketError::InvalidState {
                state: final_state,
                operation: "terminate into",
            });
        }
        if self.closed {
            return Err(MarketError::InvalidState {
                state: self.state,
                operation: "terminate",
            });
        }
        let now = self.current_time;
        if self.auction.in_auction() && !self.auction.is_opening_auction() && self.state != MarketState::Proposed {
            let (mut confirmations, _) = self.book.leave_auction(now);
            for conf in confirmations.iter_mut() {
                self.handle_confirmation(conf);
                self.emit_order_updated(&conf.order);
            }
            self.handle_uncrossed_passive_orders(&confirmations);
        }

        let mut ids: Vec<_> = self.book.all_orders().into_iter().map(|o| o.id).collect();
        ids.extend(self.parked.keys().cloned());
        ids.sort();
        ids.dedup();
        for order_id in ids {
            self.remove_order(&order_id, OrderStatus::Cancelled);
        }
        self.cancel_every_stop_order();

        self.auction.close();
        self.closed = true;
        self.set_state(MarketState::TradingTerminated);
        self.set_state(final_state);
        info!(market = %self.config.market_id, state = %final_state, "market terminated");
        Ok(())
    }
}
