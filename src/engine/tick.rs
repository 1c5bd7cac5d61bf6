// 8.9 engine/tick.rs: time driven work. order and stop expiry, auction checks,
// market value proxy windows, liquidity fee payouts and the automated purchase program.

use super::core::SpotMarket;
use crate::auction::MarketState;
use crate::events::{EventPayload, ExpiredOrdersEvent, LiquidityFeeDistributedEvent};
use crate::order::OrderStatus;
use crate::types::{hash_hex, IdGenerator, OrderId, Timestamp};
use tracing::{debug, info, warn};

impl SpotMarket {
    /// Advances the market to `now`. Returns true once the market is closed.
    pub fn on_tick(&mut self, now: Timestamp) -> bool {
        self.id_gen = IdGenerator::new(hash_hex(format!("{}{}", self.config.market_id, now.as_millis()).as_bytes()));
        if self.closed {
            return true;
        }
        self.current_time = now;

        self.remove_expired_orders(now);
        self.remove_expired_stop_orders();

        self.price_monitor.on_time_update(now);
        if let Err(e) = self.fee_splitter.set_current_time(now) {
            warn!(market = %self.config.market_id, error = %e, "fee splitter rejected the new time");
        }

        if self.state == MarketState::Proposed {
            return false;
        }

        self.drain_pap_inbox();
        self.check_auction(now);
        // an uncrossing can move the last traded price
        self.trigger_stop_orders();
        self.update_bound_factors(now);
        self.update_market_value_proxy();
        self.distribute_liquidity_fees(now);
        self.liquidity.on_tick(now);
        self.check_pap();

        self.closed
    }

    /// 8.9.1: GTT orders whose expiry is due, book and parked alike.
    fn remove_expired_orders(&mut self, now: Timestamp) {
        let due: Vec<OrderId> = self
            .expiring
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .map(|(_, id)| id.clone())
            .collect();
        if due.is_empty() {
            return;
        }

        let mut expired = Vec::with_capacity(due.len());
        for order_id in due {
            if self.remove_order(&order_id, OrderStatus::Expired).is_some() {
                expired.push(order_id);
            }
        }
        // anything left in the index pointed at an order that is already gone
        self.expiring.retain(|(expires_at, _)| *expires_at > now);

        if !expired.is_empty() {
            debug!(market = %self.config.market_id, count = expired.len(), "orders expired");
            self.emit_event(EventPayload::ExpiredOrders(ExpiredOrdersEvent {
                market_id: self.config.market_id.clone(),
                order_ids: expired,
            }));
            if !self.auction.in_auction() {
                self.check_for_reference_moves(false);
            }
        }
    }

    fn update_bound_factors(&mut self, now: Timestamp) {
        if now < self.next_bound_factor_update {
            return;
        }
        self.next_bound_factor_update = now.add_secs(self.config.bound_factor_update_period_secs);
        if !self.price_monitor.initialised() || self.auction.in_auction() {
            return;
        }
        if let Err(e) = self.price_monitor.recalculate_bound_factors() {
            debug!(market = %self.config.market_id, error = %e, "bound factors not recalculated");
        }
    }

    /// 8.9.2: a finished window feeds its average traded value to the LP shares.
    fn update_market_value_proxy(&mut self) {
        let window = self.config.market_value_window_secs;
        if self.fee_splitter.elapsed() > window {
            let avg = self.fee_splitter.avg_trade_value();
            let mark = self.mark_price();
            self.equity_shares.avg_trade_value(avg, mark);
            self.fee_splitter.time_window_start(self.current_time);
        }
        self.market_value_proxy = self
            .fee_splitter
            .market_value_proxy(window, self.equity_shares.total_stake());
    }

    /// 8.9.3: pays the liquidity fee pool out to active LPs by equity share.
    fn distribute_liquidity_fees(&mut self, now: Timestamp) {
        if now < self.next_lp_fee_distribution {
            return;
        }
        self.next_lp_fee_distribution = now.add_secs(self.config.lp_fee_distribution_period_secs);

        let market = self.config.market_id.clone();
        let asset = self.config.quote_asset.clone();
        let Ok(account) = self.ledger.get_market_liquidity_fee_account(&market, &asset) else {
            return;
        };
        if account.balance.is_zero() {
            return;
        }
        let inactive = self.liquidity.inactive_parties();
        let shares = self.equity_shares.shares_except(&inactive);
        let Some(transfer) = self.fee.build_liquidity_fees_distribute_transfer(&shares, account.balance) else {
            return;
        };
        match self.ledger.transfer_spot_fees(&market, &asset, transfer.transfers()) {
            Ok(movements) => {
                let amounts: Vec<_> = transfer
                    .total_fees_amounts_per_party()
                    .iter()
                    .map(|(party, amount)| (party.clone(), *amount))
                    .collect();
                info!(market = %market, pool = %account.balance, lps = amounts.len(), "liquidity fees distributed");
                self.emit_movements(movements);
                self.emit_event(EventPayload::LiquidityFeeDistributed(LiquidityFeeDistributedEvent {
                    market_id: market,
                    asset,
                    amounts,
                }));
            }
            Err(e) => warn!(market = %market, error = %e, "failed to distribute liquidity fees"),
        }
    }
}
