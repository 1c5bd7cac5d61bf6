// 9.3 liquidity.rs: liquidity engine seam. the spot path ships with the no-op engine.

use std::collections::BTreeSet;

use crate::types::{OrderId, PartyId, Timestamp};

// What the market needs from a liquidity engine. Implementations can model:
// - commitment tracking with SLA penalties
// - commitment orders the market must not let parties amend or bulk cancel
pub trait LiquidityEngine: std::fmt::Debug + Send {
    // LPs that don't share in the current liquidity fee distribution
    fn inactive_parties(&self) -> BTreeSet<PartyId>;

    // orders backing a liquidity commitment
    fn is_commitment_order(&self, order_id: &OrderId) -> bool;

    fn on_tick(&mut self, now: Timestamp);
}

// No commitments, every LP active.
#[derive(Debug, Clone, Default)]
pub struct NoopLiquidityEngine;

impl LiquidityEngine for NoopLiquidityEngine {
    fn inactive_parties(&self) -> BTreeSet<PartyId> {
        BTreeSet::new()
    }

    fn is_commitment_order(&self, _order_id: &OrderId) -> bool {
        false
    }

    fn on_tick(&mut self, _now: Timestamp) {}
}

// Fixed sets, for wiring an external engine's view into the market.
#[derive(Debug, Clone, Default)]
pub struct StaticLiquidityEngine {
    pub inactive: BTreeSet<PartyId>,
    pub commitment_orders: BTreeSet<OrderId>,
    pub last_tick: Option<Timestamp>,
}

impl StaticLiquidityEngine {
    pub fn with_inactive(mut self, party: &PartyId) -> Self {
        self.inactive.insert(party.clone());
        self
    }

    pub fn with_commitment_order(mut self, order_id: &OrderId) -> Self {
        self.commitment_orders.insert(order_id.clone());
        self
    }
}

impl LiquidityEngine for StaticLiquidityEngine {
    fn inactive_parties(&self) -> BTreeSet<PartyId> {
        self.inactive.clone()
    }

    fn is_commitment_order(&self, order_id: &OrderId) -> bool {
        self.commitment_orders.contains(order_id)
    }

    fn on_tick(&mut self, now: Timestamp) {
        self.last_tick = Some(now);
    }
}
