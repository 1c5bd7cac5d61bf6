// 13.0 stop_orders.rs: order submissions held off the book until the last traded
// price crosses their trigger. pooled stops hold no funds. a pair submitted
// together is one-cancels-other: whatever happens to one leg takes the other
// leg out of the pool too.

use crate::order::OrderSubmission;
use crate::types::{MarketId, OrderId, PartyId, StopOrderId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopDirection {
    FallsBelow,
    RisesAbove,
}

/// What the last traded price is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    /// Market decimals on submission, asset decimals once pooled.
    Price(Decimal),
    /// Fraction away from the best price seen since the stop was pooled.
    TrailingPercentOffset(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopExpiryStrategy {
    Cancels,
    /// Submits the underlying order on expiry. Ignored for OCO legs.
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOrderStatus {
    Pending,
    Triggered,
    Cancelled,
    /// The OCO sibling triggered.
    Stopped,
    Expired,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum StopOrderError {
    #[error("stop orders are not allowed during the opening auction")]
    NotAllowedDuringOpeningAuction,
    #[error("trading is not allowed")]
    TradingNotAllowed,
    #[error("stop order submission has no leg")]
    EmptySubmission,
    #[error("stop order is for another market")]
    InvalidMarketId,
    #[error("stop order trigger is invalid")]
    InvalidTrigger,
    #[error("stop order expiry is in the past")]
    ExpiryInThePast,
    #[error("party has no general account to fund the order")]
    MissingGeneralAccount,
    #[error("maximum stop orders per party reached")]
    MaxStopOrdersPerPartyReached,
    #[error("stop order not found")]
    NotFound,
    #[error("stop order belongs to another party")]
    InvalidPartyId,
}

/// One leg as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrderSetup {
    pub submission: OrderSubmission,
    pub trigger: StopTrigger,
    pub expires_at: Option<Timestamp>,
    pub expiry_strategy: StopExpiryStrategy,
}

impl StopOrderSetup {
    pub fn price(submission: OrderSubmission, price: Decimal) -> Self {
        Self {
            submission,
            trigger: StopTrigger::Price(price),
            expires_at: None,
            expiry_strategy: StopExpiryStrategy::Cancels,
        }
    }

    pub fn trailing(submission: OrderSubmission, offset: Decimal) -> Self {
        Self {
            trigger: StopTrigger::TrailingPercentOffset(offset),
            ..Self::price(submission, Decimal::ZERO)
        }
    }

    pub fn with_expiry(mut self, expires_at: Timestamp, strategy: StopExpiryStrategy) -> Self {
        self.expires_at = Some(expires_at);
        self.expiry_strategy = strategy;
        self
    }
}

/// A single stop or an OCO pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrdersSubmission {
    pub falls_below: Option<StopOrderSetup>,
    pub rises_above: Option<StopOrderSetup>,
}

impl StopOrdersSubmission {
    pub fn falls_below(setup: StopOrderSetup) -> Self {
        Self {
            falls_below: Some(setup),
            rises_above: None,
        }
    }

    pub fn rises_above(setup: StopOrderSetup) -> Self {
        Self {
            falls_below: None,
            rises_above: Some(setup),
        }
    }

    pub fn oco(falls_below: StopOrderSetup, rises_above: StopOrderSetup) -> Self {
        Self {
            falls_below: Some(falls_below),
            rises_above: Some(rises_above),
        }
    }

    pub fn legs(&self) -> usize {
        usize::from(self.falls_below.is_some()) + usize::from(self.rises_above.is_some())
    }

    /// Pending stop orders for `party`, linked when both legs are present.
    pub fn into_stop_orders(
        self,
        party: &PartyId,
        falls_below_id: StopOrderId,
        rises_above_id: StopOrderId,
        now: Timestamp,
    ) -> Vec<StopOrder> {
        let linked = self.falls_below.is_some() && self.rises_above.is_some();
        let mut legs = Vec::with_capacity(2);
        if let Some(setup) = self.falls_below {
            let link = linked.then(|| rises_above_id.clone());
            legs.push(StopOrder::new(falls_below_id.clone(), link, party, StopDirection::FallsBelow, setup, now));
        }
        if let Some(setup) = self.rises_above {
            let link = linked.then_some(falls_below_id);
            legs.push(StopOrder::new(rises_above_id, link, party, StopDirection::RisesAbove, setup, now));
        }
        legs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrder {
    pub id: StopOrderId,
    pub oco_link: Option<StopOrderId>,
    pub market_id: MarketId,
    pub party: PartyId,
    pub direction: StopDirection,
    pub trigger: StopTrigger,
    /// Highest price seen for a falling trail, lowest for a rising one.
    pub trail_reference: Option<Decimal>,
    pub submission: OrderSubmission,
    pub expires_at: Option<Timestamp>,
    pub expiry_strategy: StopExpiryStrategy,
    pub status: StopOrderStatus,
    pub reason: Option<StopOrderError>,
    /// Order submitted once triggered.
    pub order_id: Option<OrderId>,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
}

impl StopOrder {
    fn new(
        id: StopOrderId,
        oco_link: Option<StopOrderId>,
        party: &PartyId,
        direction: StopDirection,
        setup: StopOrderSetup,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            oco_link,
            market_id: setup.submission.market_id.clone(),
            party: party.clone(),
            direction,
            trigger: setup.trigger,
            trail_reference: None,
            submission: setup.submission,
            expires_at: setup.expires_at,
            expiry_strategy: setup.expiry_strategy,
            status: StopOrderStatus::Pending,
            reason: None,
            order_id: None,
            created_at: now,
            updated_at: None,
        }
    }

    /// Price at which the stop fires. A trail without a reference has none.
    pub fn trigger_price(&self) -> Option<Decimal> {
        match self.trigger {
            StopTrigger::Price(price) => Some(price),
            StopTrigger::TrailingPercentOffset(offset) => {
                let reference = self.trail_reference?;
                let factor = match self.direction {
                    StopDirection::FallsBelow => Decimal::ONE - offset,
                    StopDirection::RisesAbove => Decimal::ONE + offset,
                };
                reference.checked_mul(factor)
            }
        }
    }

    pub fn would_trigger(&self, price: Decimal) -> bool {
        match (self.direction, self.trigger_price()) {
            (StopDirection::FallsBelow, Some(trigger)) => price <= trigger,
            (StopDirection::RisesAbove, Some(trigger)) => price >= trigger,
            (_, None) => false,
        }
    }

    /// Drags a trailing reference along with favourable moves.
    pub fn follow(&mut self, price: Decimal) {
        if !matches!(self.trigger, StopTrigger::TrailingPercentOffset(_)) {
            return;
        }
        let reference = match (self.direction, self.trail_reference) {
            (_, None) => price,
            (StopDirection::FallsBelow, Some(r)) => r.max(price),
            (StopDirection::RisesAbove, Some(r)) => r.min(price),
        };
        self.trail_reference = Some(reference);
    }

    pub fn reject(&mut self, reason: StopOrderError, now: Timestamp) {
        self.status = StopOrderStatus::Rejected;
        self.reason = Some(reason);
        self.updated_at = Some(now);
    }

    fn finish(mut self, status: StopOrderStatus, now: Timestamp) -> Self {
        self.status = status;
        self.updated_at = Some(now);
        self
    }
}

/// Serializable pool state; orders are ordered by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrdersState {
    pub market_id: MarketId,
    pub orders: Vec<StopOrder>,
}

/// Pending stop orders of one market.
#[derive(Debug, Clone)]
pub struct StopOrders {
    market_id: MarketId,
    orders: BTreeMap<StopOrderId, StopOrder>,
    by_party: BTreeMap<PartyId, BTreeSet<StopOrderId>>,
    expiring: BTreeSet<(Timestamp, StopOrderId)>,
}

impl StopOrders {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            orders: BTreeMap::new(),
            by_party: BTreeMap::new(),
            expiring: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, id: &StopOrderId) -> Option<&StopOrder> {
        self.orders.get(id)
    }

    pub fn count_for_party(&self, party: &PartyId) -> usize {
        self.by_party.get(party).map_or(0, |ids| ids.len())
    }

    pub fn orders_for_party(&self, party: &PartyId) -> Vec<&StopOrder> {
        self.by_party
            .get(party)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, order: StopOrder) {
        if let Some(expires_at) = order.expires_at {
            self.expiring.insert((expires_at, order.id.clone()));
        }
        self.by_party.entry(order.party.clone()).or_default().insert(order.id.clone());
        self.orders.insert(order.id.clone(), order);
    }

    fn take(&mut self, id: &StopOrderId) -> Option<StopOrder> {
        let order = self.orders.remove(id)?;
        if let Some(ids) = self.by_party.get_mut(&order.party) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_party.remove(&order.party);
            }
        }
        if let Some(expires_at) = order.expires_at {
            self.expiring.remove(&(expires_at, id.clone()));
        }
        Some(order)
    }

    /// Removes `id` and its OCO sibling, the sibling last.
    fn take_with_sibling(&mut self, id: &StopOrderId) -> Vec<StopOrder> {
        let Some(order) = self.take(id) else {
            return Vec::new();
        };
        let sibling = order.oco_link.as_ref().and_then(|link| self.take(link));
        std::iter::once(order).chain(sibling).collect()
    }

    /// Cancels one stop order with its sibling, or every stop order of
    /// `party` when `id` is `None`.
    pub fn cancel(&mut self, party: &PartyId, id: Option<&StopOrderId>, now: Timestamp) -> Result<Vec<StopOrder>, StopOrderError> {
        let ids: Vec<StopOrderId> = match id {
            Some(id) => {
                let order = self.orders.get(id).ok_or(StopOrderError::NotFound)?;
                if &order.party != party {
                    return Err(StopOrderError::InvalidPartyId);
                }
                vec![id.clone()]
            }
            None => self.by_party.get(party).map(|ids| ids.iter().cloned().collect()).unwrap_or_default(),
        };
        let mut cancelled = Vec::with_capacity(ids.len());
        for id in &ids {
            cancelled.extend(
                self.take_with_sibling(id)
                    .into_iter()
                    .map(|o| o.finish(StopOrderStatus::Cancelled, now)),
            );
        }
        Ok(cancelled)
    }

    /// Everything left in the pool, cancelled. Used when the market closes.
    pub fn cancel_every_order(&mut self, now: Timestamp) -> Vec<StopOrder> {
        let ids: Vec<StopOrderId> = self.orders.keys().cloned().collect();
        ids.iter()
            .filter_map(|id| self.take(id))
            .map(|o| o.finish(StopOrderStatus::Cancelled, now))
            .collect()
    }

    /// Feeds a new last traded price. Returns the triggered stops in id order
    /// and the OCO siblings they stopped.
    pub fn price_updated(&mut self, price: Decimal, now: Timestamp) -> (Vec<StopOrder>, Vec<StopOrder>) {
        let mut hits = Vec::new();
        for (id, order) in self.orders.iter_mut() {
            order.follow(price);
            if order.would_trigger(price) {
                hits.push(id.clone());
            }
        }

        let mut triggered = Vec::with_capacity(hits.len());
        let mut stopped = Vec::new();
        for id in &hits {
            // a sibling that also crossed was stopped by its partner
            let Some(order) = self.take(id) else {
                continue;
            };
            if let Some(sibling) = order.oco_link.as_ref().and_then(|link| self.take(link)) {
                stopped.push(sibling.finish(StopOrderStatus::Stopped, now));
            }
            triggered.push(order.finish(StopOrderStatus::Triggered, now));
        }
        (triggered, stopped)
    }

    /// Stops whose expiry is due, with their OCO siblings.
    pub fn remove_expired(&mut self, now: Timestamp) -> Vec<StopOrder> {
        let due: Vec<StopOrderId> = self
            .expiring
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .map(|(_, id)| id.clone())
            .collect();
        let mut expired = Vec::with_capacity(due.len());
        for id in &due {
            expired.extend(
                self.take_with_sibling(id)
                    .into_iter()
                    .map(|o| o.finish(StopOrderStatus::Expired, now)),
            );
        }
        expired
    }

    pub fn state(&self) -> StopOrdersState {
        StopOrdersState {
            market_id: self.market_id.clone(),
            orders: self.orders.values().cloned().collect(),
        }
    }

    pub fn restore(state: StopOrdersState) -> Self {
        let mut pool = Self::new(state.market_id);
        for order in state.orders {
            pool.insert(order);
        }
        pool
    }
}
