//! Price-time priority order book.
//!
//! The market consumes the book through the [`MatchingBook`] trait. [`OrderBook`]
//! is the in-process implementation: continuous matching at the resting price,
//! auction accumulation with a volume-maximising uncross, iceberg refresh and
//! per-batch ids for frequent batch auctions.

use crate::order::{Order, OrderConfirmation, OrderError, OrderStatus, TimeInForce, Trade};
use crate::types::{OrderId, PartyId, Side, Timestamp, TradeId};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchingError {
    #[error("order {0} not found in book")]
    OrderNotFound(OrderId),
    #[error("order {0} is already on the book")]
    DuplicateOrder(OrderId),
    #[error("in place amendment of {0} cannot change side or price, or increase size")]
    InvalidInPlaceAmendment(OrderId),
}

/// Operations the market needs from a matching book.
pub trait MatchingBook: std::fmt::Debug + Send {
    /// Matches (continuous) or rests (auction) the order. The caller's order is updated.
    fn submit_order(&mut self, order: &mut Order) -> Result<OrderConfirmation, MatchingError>;
    /// Removes the order and returns the book's copy.
    fn cancel_order(&mut self, order_id: &OrderId) -> Result<Order, MatchingError>;
    /// Atomically removes `original_id` and submits `replacement`.
    fn replace_order(&mut self, original_id: &OrderId, replacement: &mut Order) -> Result<OrderConfirmation, MatchingError>;
    /// In place amendment keeping priority: size decrease, expiry or time in force.
    fn amend_order(&mut self, amended: &Order) -> Result<(), MatchingError>;
    fn get_order_by_id(&self, order_id: &OrderId) -> Option<&Order>;
    /// Trades the order would produce right now, without touching the book.
    fn get_trades(&self, order: &Order) -> Vec<Trade>;
    /// Trades an uncross would produce right now.
    fn get_indicative_trades(&self) -> Vec<Trade>;
    /// Switches to auction; returns the orders that must be cancelled (GFN).
    fn enter_auction(&mut self) -> Vec<Order>;
    /// Uncrosses and switches to continuous; returns confirmations and orders to cancel (GFA).
    fn leave_auction(&mut self, now: Timestamp) -> (Vec<OrderConfirmation>, Vec<Order>);
    fn best_static_bid_price_and_volume(&self) -> Option<(Decimal, u64)>;
    fn best_static_ask_price_and_volume(&self) -> Option<(Decimal, u64)>;
    fn best_bid_price(&self) -> Option<Decimal>;
    fn best_ask_price(&self) -> Option<Decimal>;
    fn get_active_pegged_order_ids(&self) -> Vec<OrderId>;
    fn orders_for_party(&self, party: &PartyId) -> Vec<Order>;
    fn all_orders(&self) -> Vec<Order>;
    fn in_auction(&self) -> bool;
    fn batch_id(&self) -> u64;
}

/// Priority key. Bids sort by price descending, asks ascending, then by arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BookKey {
    side: Side,
    price: Decimal,
    seq: u64,
}

impl PartialOrd for BookKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BookKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_price = match self.side {
            Side::Buy => other.price.cmp(&self.price),
            Side::Sell => self.price.cmp(&other.price),
        };
        by_price.then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone)]
struct Match {
    buy: BookKey,
    sell: BookKey,
    size: u64,
}

#[derive(Debug, Clone)]
struct Uncross {
    price: Decimal,
    market_price: Decimal,
    matches: Vec<Match>,
}

/// Central limit order book.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<BookKey, Order>,
    asks: BTreeMap<BookKey, Order>,
    index: HashMap<OrderId, BookKey>,
    next_seq: u64,
    auction: bool,
    batch_id: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book that starts in auction (markets with an opening auction).
    pub fn new_in_auction() -> Self {
        Self {
            auction: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<BookKey, Order> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn insert(&mut self, mut order: Order) {
        self.next_seq += 1;
        let key = BookKey {
            side: order.side,
            price: order.price,
            seq: self.next_seq,
        };
        order.status = OrderStatus::Active;
        self.index.insert(order.id.clone(), key);
        self.side_mut(order.side).insert(key, order);
    }

    fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let key = self.index.remove(order_id)?;
        self.side_mut(key.side).remove(&key)
    }

    fn crosses(side: Side, limit: Decimal, resting: Decimal) -> bool {
        match side {
            Side::Buy => limit >= resting,
            Side::Sell => limit <= resting,
        }
    }

    fn trade_between(aggressor: Option<Side>, buy: &Order, sell: &Order, size: u64, price: Decimal, market_price: Decimal, at: Timestamp) -> Trade {
        Trade {
            id: TradeId::default(),
            market_id: buy.market_id.clone(),
            price,
            market_price,
            size,
            buyer: buy.party.clone(),
            seller: sell.party.clone(),
            buy_order: buy.id.clone(),
            sell_order: sell.id.clone(),
            aggressor,
            timestamp: at,
            buyer_fee: None,
            seller_fee: None,
            buyer_auction_batch: buy.batch_id,
            seller_auction_batch: sell.batch_id,
        }
    }

    /// Volume available to `order` before hitting its limit or its own party.
    fn crossing_volume(&self, order: &Order) -> u64 {
        let opposite = match order.side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };
        let mut volume = 0;
        for resting in opposite.values() {
            if !Self::crosses(order.side, order.price, resting.price) || resting.party == order.party {
                break;
            }
            volume += resting.true_remaining();
        }
        volume
    }

    // 2.1: continuous matching. the aggressor trades its full size, icebergs included.
    fn match_incoming(&mut self, incoming: &mut Order) -> (Vec<Trade>, Vec<Order>) {
        let mut trades = Vec::new();
        let mut passive: Vec<Order> = Vec::new();
        let at = incoming.updated_at.unwrap_or(incoming.created_at);

        while incoming.true_remaining() > 0 {
            let book = match incoming.side {
                Side::Buy => &mut self.asks,
                Side::Sell => &mut self.bids,
            };
            let Some(key) = book.keys().next().copied() else {
                break;
            };
            let Some(resting) = book.get_mut(&key) else {
                break;
            };
            if !Self::crosses(incoming.side, incoming.price, resting.price) {
                break;
            }
            if resting.party == incoming.party {
                incoming.reject(OrderError::SelfTrading);
                break;
            }

            let size = incoming.true_remaining().min(resting.remaining);
            consume(incoming, size);
            resting.remaining -= size;

            let trade = match incoming.side {
                Side::Buy => Self::trade_between(Some(Side::Buy), incoming, resting, size, resting.price, resting.original_price, at),
                Side::Sell => Self::trade_between(Some(Side::Sell), resting, incoming, size, resting.price, resting.original_price, at),
            };
            trades.push(trade);

            let mut updated = resting.clone();
            if updated.remaining == 0 {
                book.remove(&key);
                self.index.remove(&updated.id);
                if updated.refresh_iceberg() {
                    // refreshed icebergs go to the back of the queue
                    self.insert(updated.clone());
                } else {
                    updated.status = OrderStatus::Filled;
                }
            }
            match passive.iter_mut().find(|o| o.id == updated.id) {
                Some(existing) => *existing = updated,
                None => passive.push(updated),
            }
        }
        (trades, passive)
    }

    fn finish_continuous(&mut self, order: &mut Order) {
        if order.status.is_terminal() {
            return;
        }
        if order.true_remaining() == 0 {
            order.status = OrderStatus::Filled;
            return;
        }
        match order.time_in_force {
            TimeInForce::IOC => order.status = OrderStatus::Stopped,
            TimeInForce::FOK => order.reject(OrderError::NotFilled),
            _ => {
                order.set_iceberg_visible();
                self.insert(order.clone());
                order.status = OrderStatus::Active;
            }
        }
    }

    // 2.2: uncrossing. maximise volume, then minimise imbalance, then take the middle candidate.
    fn uncrossing(&self) -> Option<Uncross> {
        let mut candidates: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for o in self.bids.values().chain(self.asks.values()) {
            candidates.entry(o.price).or_insert(o.original_price);
        }

        let mut best_volume = 0u64;
        let mut best_imbalance = u64::MAX;
        let mut ties: Vec<(Decimal, Decimal)> = Vec::new();
        for (&price, &market_price) in &candidates {
            let buy: u64 = self.bids.values().filter(|o| o.price >= price).map(Order::true_remaining).sum();
            let sell: u64 = self.asks.values().filter(|o| o.price <= price).map(Order::true_remaining).sum();
            let volume = buy.min(sell);
            let imbalance = buy.abs_diff(sell);
            if volume == 0 {
                continue;
            }
            if volume > best_volume || (volume == best_volume && imbalance < best_imbalance) {
                best_volume = volume;
                best_imbalance = imbalance;
                ties.clear();
            }
            if volume == best_volume && imbalance == best_imbalance {
                ties.push((price, market_price));
            }
        }
        if best_volume == 0 {
            return None;
        }
        let (price, market_price) = ties[(ties.len() - 1) / 2];

        let mut buys = self.bids.iter().filter(|(_, o)| o.price >= price).map(|(k, o)| (*k, o.true_remaining()));
        let mut sells = self.asks.iter().filter(|(_, o)| o.price <= price).map(|(k, o)| (*k, o.true_remaining()));
        let mut matches = Vec::new();
        let mut left = best_volume;
        let mut buy = buys.next();
        let mut sell = sells.next();
        while left > 0 {
            let (Some((bk, bq)), Some((sk, sq))) = (buy, sell) else {
                break;
            };
            let size = bq.min(sq).min(left);
            matches.push(Match { buy: bk, sell: sk, size });
            left -= size;
            buy = if bq == size { buys.next() } else { Some((bk, bq - size)) };
            sell = if sq == size { sells.next() } else { Some((sk, sq - size)) };
        }
        Some(Uncross {
            price,
            market_price,
            matches,
        })
    }
}

/// Takes `size` from visible remaining first, then from the iceberg reserve.
fn consume(order: &mut Order, size: u64) {
    let visible = size.min(order.remaining);
    order.remaining -= visible;
    let hidden = size - visible;
    if hidden > 0 {
        if let Some(iceberg) = order.iceberg.as_mut() {
            iceberg.reserved_remaining -= hidden.min(iceberg.reserved_remaining);
        }
    }
}

impl MatchingBook for OrderBook {
    fn submit_order(&mut self, order: &mut Order) -> Result<OrderConfirmation, MatchingError> {
        if self.index.contains_key(&order.id) {
            return Err(MatchingError::DuplicateOrder(order.id.clone()));
        }
        order.batch_id = self.batch_id;

        if self.auction {
            order.set_iceberg_visible();
            self.insert(order.clone());
            order.status = OrderStatus::Active;
            return Ok(OrderConfirmation::new(order.clone()));
        }

        if order.time_in_force == TimeInForce::FOK && self.crossing_volume(order) < order.true_remaining() {
            order.reject(OrderError::NotFilled);
            return Ok(OrderConfirmation::new(order.clone()));
        }

        let (trades, passive) = self.match_incoming(order);
        self.finish_continuous(order);
        Ok(OrderConfirmation {
            order: order.clone(),
            trades,
            passive_orders_affected: passive,
        })
    }

    fn cancel_order(&mut self, order_id: &OrderId) -> Result<Order, MatchingError> {
        self.remove(order_id).ok_or_else(|| MatchingError::OrderNotFound(order_id.clone()))
    }

    fn replace_order(&mut self, original_id: &OrderId, replacement: &mut Order) -> Result<OrderConfirmation, MatchingError> {
        self.cancel_order(original_id)?;
        self.submit_order(replacement)
    }

    fn amend_order(&mut self, amended: &Order) -> Result<(), MatchingError> {
        let key = *self
            .index
            .get(&amended.id)
            .ok_or_else(|| MatchingError::OrderNotFound(amended.id.clone()))?;
        let book = self.side_mut(key.side);
        let existing = book
            .get_mut(&key)
            .ok_or_else(|| MatchingError::OrderNotFound(amended.id.clone()))?;
        let grows = amended.true_remaining() > existing.true_remaining() && amended.iceberg.is_none();
        if existing.side != amended.side || existing.price != amended.price || grows {
            return Err(MatchingError::InvalidInPlaceAmendment(amended.id.clone()));
        }
        *existing = amended.clone();
        existing.status = OrderStatus::Active;
        Ok(())
    }

    fn get_order_by_id(&self, order_id: &OrderId) -> Option<&Order> {
        let key = self.index.get(order_id)?;
        match key.side {
            Side::Buy => self.bids.get(key),
            Side::Sell => self.asks.get(key),
        }
    }

    fn get_trades(&self, order: &Order) -> Vec<Trade> {
        if self.auction {
            return Vec::new();
        }
        if order.time_in_force == TimeInForce::FOK && self.crossing_volume(order) < order.true_remaining() {
            return Vec::new();
        }
        let opposite = match order.side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };
        let at = order.updated_at.unwrap_or(order.created_at);
        let mut left = order.true_remaining();
        let mut trades = Vec::new();
        for resting in opposite.values() {
            if left == 0 || !Self::crosses(order.side, order.price, resting.price) || resting.party == order.party {
                break;
            }
            let size = left.min(resting.true_remaining());
            left -= size;
            let trade = match order.side {
                Side::Buy => Self::trade_between(Some(Side::Buy), order, resting, size, resting.price, resting.original_price, at),
                Side::Sell => Self::trade_between(Some(Side::Sell), resting, order, size, resting.price, resting.original_price, at),
            };
            trades.push(trade);
        }
        trades
    }

    fn get_indicative_trades(&self) -> Vec<Trade> {
        let Some(plan) = self.uncrossing() else {
            return Vec::new();
        };
        plan.matches
            .iter()
            .filter_map(|m| {
                let buy = self.bids.get(&m.buy)?;
                let sell = self.asks.get(&m.sell)?;
                let at = buy.updated_at.unwrap_or(buy.created_at).max(sell.updated_at.unwrap_or(sell.created_at));
                Some(Self::trade_between(None, buy, sell, m.size, plan.price, plan.market_price, at))
            })
            .collect()
    }

    fn enter_auction(&mut self) -> Vec<Order> {
        self.auction = true;
        self.bids
            .values()
            .chain(self.asks.values())
            .filter(|o| o.time_in_force == TimeInForce::GFN)
            .cloned()
            .collect()
    }

    fn leave_auction(&mut self, now: Timestamp) -> (Vec<OrderConfirmation>, Vec<Order>) {
        let mut confirmations: Vec<OrderConfirmation> = Vec::new();
        if let Some(plan) = self.uncrossing() {
            for m in &plan.matches {
                let (Some(mut buy), Some(mut sell)) = (self.bids.get(&m.buy).cloned(), self.asks.get(&m.sell).cloned()) else {
                    continue;
                };
                consume(&mut buy, m.size);
                consume(&mut sell, m.size);
                let trade = Self::trade_between(None, &buy, &sell, m.size, plan.price, plan.market_price, now);

                for order in [&mut buy, &mut sell] {
                    if order.true_remaining() == 0 {
                        order.status = OrderStatus::Filled;
                    } else if order.remaining == 0 {
                        order.refresh_iceberg();
                    }
                }
                self.bids.insert(m.buy, buy.clone());
                self.asks.insert(m.sell, sell.clone());

                match confirmations.iter_mut().find(|c| c.order.id == buy.id) {
                    Some(conf) => {
                        conf.order = buy.clone();
                        conf.trades.push(trade);
                        match conf.passive_orders_affected.iter_mut().find(|o| o.id == sell.id) {
                            Some(existing) => *existing = sell.clone(),
                            None => conf.passive_orders_affected.push(sell.clone()),
                        }
                    }
                    None => confirmations.push(OrderConfirmation {
                        order: buy.clone(),
                        trades: vec![trade],
                        passive_orders_affected: vec![sell.clone()],
                    }),
                }
                // a sell that shows up in an earlier confirmation keeps its latest state there too
                for conf in confirmations.iter_mut() {
                    if let Some(existing) = conf.passive_orders_affected.iter_mut().find(|o| o.id == sell.id) {
                        *existing = sell.clone();
                    }
                }
            }
            let filled: Vec<OrderId> = self
                .bids
                .values()
                .chain(self.asks.values())
                .filter(|o| o.status == OrderStatus::Filled)
                .map(|o| o.id.clone())
                .collect();
            for id in filled {
                self.remove(&id);
            }
        }

        self.auction = false;
        self.batch_id += 1;
        let to_cancel = self
            .bids
            .values()
            .chain(self.asks.values())
            .filter(|o| o.time_in_force == TimeInForce::GFA)
            .cloned()
            .collect();
        (confirmations, to_cancel)
    }

    fn best_static_bid_price_and_volume(&self) -> Option<(Decimal, u64)> {
        best_static(self.bids.values())
    }

    fn best_static_ask_price_and_volume(&self) -> Option<(Decimal, u64)> {
        best_static(self.asks.values())
    }

    fn best_bid_price(&self) -> Option<Decimal> {
        self.bids.values().next().map(|o| o.price)
    }

    fn best_ask_price(&self) -> Option<Decimal> {
        self.asks.values().next().map(|o| o.price)
    }

    fn get_active_pegged_order_ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self
            .bids
            .values()
            .chain(self.asks.values())
            .filter(|o| o.is_pegged())
            .map(|o| o.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn orders_for_party(&self, party: &PartyId) -> Vec<Order> {
        self.bids
            .values()
            .chain(self.asks.values())
            .filter(|o| &o.party == party)
            .cloned()
            .collect()
    }

    fn all_orders(&self) -> Vec<Order> {
        self.bids.values().chain(self.asks.values()).cloned().collect()
    }

    fn in_auction(&self) -> bool {
        self.auction
    }

    fn batch_id(&self) -> u64 {
        self.batch_id
    }
}

fn best_static<'a>(orders: impl Iterator<Item = &'a Order>) -> Option<(Decimal, u64)> {
    let mut best: Option<(Decimal, u64)> = None;
    for o in orders.filter(|o| !o.is_pegged()) {
        match best {
            None => best = Some((o.price, o.remaining)),
            Some((price, volume)) if price == o.price => best = Some((price, volume + o.remaining)),
            Some(_) => break,
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{IcebergOrder, OrderType, PeggedOrder, PeggedReference};
    use crate::types::MarketId;
    use rust_decimal_macros::dec;

    fn order(id: &str, party: &str, side: Side, price: Decimal, size: u64) -> Order {
        Order {
            id: OrderId::from(id),
            market_id: MarketId::from("m"),
            party: PartyId::from(party),
            side,
            price,
            original_price: price,
            size,
            remaining: size,
            time_in_force: TimeInForce::GTC,
            order_type: OrderType::Limit,
            status: OrderStatus::Active,
            reason: None,
            created_at: Timestamp::from_millis(0),
            updated_at: None,
            expires_at: None,
            version: 1,
            batch_id: 0,
            pegged: None,
            iceberg: None,
            post_only: false,
        }
    }

    #[test]
    fn price_time_priority() {
        let mut book = OrderBook::new();
        book.submit_order(&mut order("a1", "alice", Side::Sell, dec!(101), 5)).unwrap();
        book.submit_order(&mut order("a2", "bob", Side::Sell, dec!(100), 5)).unwrap();
        book.submit_order(&mut order("a3", "carol", Side::Sell, dec!(100), 5)).unwrap();

        let mut taker = order("t", "dave", Side::Buy, dec!(101), 12);
        let conf = book.submit_order(&mut taker).unwrap();

        assert_eq!(conf.trades.len(), 3);
        assert_eq!(conf.trades[0].sell_order.as_str(), "a2");
        assert_eq!(conf.trades[1].sell_order.as_str(), "a3");
        assert_eq!(conf.trades[2].price, dec!(101));
        assert_eq!(conf.trades[2].size, 2);
        assert_eq!(conf.order.status, OrderStatus::Filled);
        assert_eq!(book.best_ask_price(), Some(dec!(101)));
        assert_eq!(book.get_order_by_id(&OrderId::from("a1")).map(|o| o.remaining), Some(3));
    }

    #[test]
    fn bid_priority_same_price_is_fifo() {
        let mut book = OrderBook::new();
        book.submit_order(&mut order("b1", "alice", Side::Buy, dec!(100), 1)).unwrap();
        book.submit_order(&mut order("b2", "bob", Side::Buy, dec!(100), 1)).unwrap();
        let conf = book.submit_order(&mut order("s", "carol", Side::Sell, dec!(100), 1)).unwrap();
        assert_eq!(conf.trades[0].buy_order.as_str(), "b1");
    }

    #[test]
    fn ioc_and_fok_do_not_rest() {
        let mut book = OrderBook::new();
        book.submit_order(&mut order("s", "alice", Side::Sell, dec!(100), 5)).unwrap();

        let mut ioc = order("i", "bob", Side::Buy, dec!(100), 8);
        ioc.time_in_force = TimeInForce::IOC;
        let conf = book.submit_order(&mut ioc).unwrap();
        assert_eq!(conf.trades.len(), 1);
        assert_eq!(conf.order.status, OrderStatus::Stopped);
        assert!(book.get_order_by_id(&OrderId::from("i")).is_none());

        book.submit_order(&mut order("s2", "alice", Side::Sell, dec!(100), 5)).unwrap();
        let mut fok = order("f", "bob", Side::Buy, dec!(100), 8);
        fok.time_in_force = TimeInForce::FOK;
        let conf = book.submit_order(&mut fok).unwrap();
        assert!(conf.trades.is_empty());
        assert_eq!(conf.order.reason, Some(OrderError::NotFilled));
    }

    #[test]
    fn self_trade_stops_aggressor() {
        let mut book = OrderBook::new();
        book.submit_order(&mut order("s", "alice", Side::Sell, dec!(100), 5)).unwrap();
        let mut own = order("b", "alice", Side::Buy, dec!(100), 5);
        let conf = book.submit_order(&mut own).unwrap();
        assert!(conf.trades.is_empty());
        assert_eq!(conf.order.status, OrderStatus::Stopped);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn dry_run_matches_real_run() {
        let mut book = OrderBook::new();
        book.submit_order(&mut order("s1", "alice", Side::Sell, dec!(100), 3)).unwrap();
        book.submit_order(&mut order("s2", "bob", Side::Sell, dec!(102), 3)).unwrap();
        let mut taker = order("t", "carol", Side::Buy, dec!(105), 4);
        let preview = book.get_trades(&taker);
        let conf = book.submit_order(&mut taker).unwrap();
        assert_eq!(preview.len(), conf.trades.len());
        assert_eq!(preview[1].size, conf.trades[1].size);
    }

    #[test]
    fn auction_accumulates_and_uncrosses() {
        let mut book = OrderBook::new_in_auction();
        book.submit_order(&mut order("b1", "alice", Side::Buy, dec!(105), 10)).unwrap();
        book.submit_order(&mut order("b2", "bob", Side::Buy, dec!(100), 10)).unwrap();
        book.submit_order(&mut order("s1", "carol", Side::Sell, dec!(95), 5)).unwrap();
        book.submit_order(&mut order("s2", "dave", Side::Sell, dec!(100), 10)).unwrap();
        assert_eq!(book.len(), 4);

        let indicative = book.get_indicative_trades();
        let volume: u64 = indicative.iter().map(|t| t.size).sum();
        assert_eq!(volume, 15);
        assert!(indicative.iter().all(|t| t.price == dec!(100) && t.aggressor.is_none()));

        let (confs, to_cancel) = book.leave_auction(Timestamp::from_millis(5));
        assert!(to_cancel.is_empty());
        let traded: u64 = confs.iter().flat_map(|c| c.trades.iter()).map(|t| t.size).sum();
        assert_eq!(traded, 15);
        assert!(!book.in_auction());
        assert_eq!(book.batch_id(), 1);
        // b2 keeps 5 at 100, nothing else remains
        assert_eq!(book.len(), 1);
        assert_eq!(book.get_order_by_id(&OrderId::from("b2")).map(|o| o.remaining), Some(5));
    }

    #[test]
    fn enter_and_leave_return_orders_to_cancel() {
        let mut book = OrderBook::new();
        let mut gfn = order("n", "alice", Side::Buy, dec!(90), 1);
        gfn.time_in_force = TimeInForce::GFN;
        book.submit_order(&mut gfn).unwrap();
        let cancel = book.enter_auction();
        assert_eq!(cancel.len(), 1);

        let mut gfa = order("a", "bob", Side::Buy, dec!(80), 1);
        gfa.time_in_force = TimeInForce::GFA;
        book.submit_order(&mut gfa).unwrap();
        let (_, cancel) = book.leave_auction(Timestamp::from_millis(1));
        assert_eq!(cancel.len(), 1);
        assert_eq!(cancel[0].id.as_str(), "a");
    }

    #[test]
    fn iceberg_refreshes_and_loses_priority() {
        let mut book = OrderBook::new();
        let mut ice = order("ice", "alice", Side::Sell, dec!(100), 30);
        ice.iceberg = Some(IcebergOrder {
            peak_size: 10,
            minimum_visible_size: 5,
            reserved_remaining: 0,
        });
        book.submit_order(&mut ice).unwrap();
        book.submit_order(&mut order("plain", "bob", Side::Sell, dec!(100), 10)).unwrap();
        assert_eq!(book.best_static_ask_price_and_volume(), Some((dec!(100), 20)));

        let conf = book.submit_order(&mut order("t", "carol", Side::Buy, dec!(100), 10)).unwrap();
        assert_eq!(conf.trades.len(), 1);
        assert_eq!(conf.trades[0].sell_order.as_str(), "ice");

        let conf = book.submit_order(&mut order("t2", "carol", Side::Buy, dec!(100), 10)).unwrap();
        assert_eq!(conf.trades[0].sell_order.as_str(), "plain");
        let ice = book.get_order_by_id(&OrderId::from("ice")).cloned().unwrap();
        assert_eq!(ice.remaining, 10);
        assert_eq!(ice.true_remaining(), 20);
    }

    #[test]
    fn static_best_skips_pegged() {
        let mut book = OrderBook::new();
        let mut pegged = order("p", "alice", Side::Buy, dec!(101), 1);
        pegged.pegged = Some(PeggedOrder {
            reference: PeggedReference::BestBid,
            offset: dec!(0),
        });
        book.submit_order(&mut pegged).unwrap();
        book.submit_order(&mut order("b", "bob", Side::Buy, dec!(100), 2)).unwrap();
        assert_eq!(book.best_bid_price(), Some(dec!(101)));
        assert_eq!(book.best_static_bid_price_and_volume(), Some((dec!(100), 2)));
        assert_eq!(book.get_active_pegged_order_ids(), vec![OrderId::from("p")]);
    }

    #[test]
    fn in_place_amend_rejects_price_change() {
        let mut book = OrderBook::new();
        let mut o = order("b", "bob", Side::Buy, dec!(100), 5);
        book.submit_order(&mut o).unwrap();
        let mut smaller = o.clone();
        smaller.remaining = 3;
        smaller.size = 3;
        book.amend_order(&smaller).unwrap();
        assert_eq!(book.get_order_by_id(&o.id).map(|o| o.remaining), Some(3));

        let mut moved = smaller.clone();
        moved.price = dec!(99);
        assert!(matches!(book.amend_order(&moved), Err(MatchingError::InvalidInPlaceAmendment(_))));
    }
}
