//! Liquidity provider stake and equity-like shares.
//!
//! Physical stake is what an LP has committed; virtual stake grows with the
//! market value proxy and is what shares are computed from. Totals are kept
//! incrementally on every update.

use crate::types::PartyId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LpStake {
    pub buy_stake: Decimal,
    pub sell_stake: Decimal,
    pub buy_vstake: Decimal,
    pub sell_vstake: Decimal,
    /// min(buy, sell × mark) at the last update
    pub stake: Decimal,
    pub vstake: Decimal,
    pub avg: Decimal,
    pub share: Decimal,
}

fn combined(buy: Decimal, sell: Decimal, mark_price: Decimal) -> Decimal {
    buy.min(sell * mark_price)
}

fn scale_side(vstake: Decimal, old: Decimal, new: Decimal) -> Decimal {
    if new >= old {
        vstake + (new - old)
    } else if old.is_zero() {
        new
    } else {
        vstake * new / old
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquitySharesState {
    pub market_value_proxy: Decimal,
    pub opening_auction_ended: bool,
    pub total_stake: Decimal,
    pub total_vstake: Decimal,
    pub lps: Vec<(PartyId, LpStake)>,
}

#[derive(Debug, Clone, Default)]
pub struct EquityShares {
    mvp: Decimal,
    opening_auction_ended: bool,
    total_stake: Decimal,
    total_vstake: Decimal,
    lps: BTreeMap<PartyId, LpStake>,
}

impl EquityShares {
    pub fn new(mvp: Decimal) -> Self {
        Self {
            mvp,
            ..Self::default()
        }
    }

    pub fn opening_auction_ended(&mut self) {
        self.opening_auction_ended = true;
    }

    pub fn market_value_proxy(&self) -> Decimal {
        self.mvp
    }

    pub fn total_stake(&self) -> Decimal {
        self.total_stake
    }

    pub fn total_vstake(&self) -> Decimal {
        self.total_vstake
    }

    pub fn lp_count(&self) -> usize {
        self.lps.len()
    }

    pub fn get(&self, party: &PartyId) -> Option<&LpStake> {
        self.lps.get(party)
    }

    pub fn avg_entry_valuation(&self, party: &PartyId) -> Decimal {
        self.lps.get(party).map(|lp| lp.avg).unwrap_or_default()
    }

    /// 6.1: sets an LP's committed stake per side.
    ///
    /// A new LP's average entry valuation is the total virtual stake once it is
    /// added. An increase blends the old average with the total virtual stake
    /// weighted by the change in virtual stake. A decrease scales virtual stake
    /// pro rata and leaves the average alone. These two paths are not inverses.
    pub fn set_party_stake(&mut self, party: &PartyId, buy_stake: Decimal, sell_stake: Decimal, mark_price: Decimal) {
        let new_stake = combined(buy_stake, sell_stake, mark_price);

        if new_stake.is_zero() {
            if let Some(lp) = self.lps.remove(party) {
                self.total_stake -= lp.stake;
                self.total_vstake -= lp.vstake;
            }
            return;
        }

        let Some(lp) = self.lps.get_mut(party) else {
            let vstake = new_stake;
            self.total_stake += new_stake;
            self.total_vstake += vstake;
            self.lps.insert(
                party.clone(),
                LpStake {
                    buy_stake,
                    sell_stake,
                    buy_vstake: buy_stake,
                    sell_vstake: sell_stake,
                    stake: new_stake,
                    vstake,
                    avg: self.total_vstake,
                    share: Decimal::ZERO,
                },
            );
            return;
        };

        let old_stake = lp.stake;
        let old_vstake = lp.vstake;
        lp.buy_vstake = scale_side(lp.buy_vstake, lp.buy_stake, buy_stake);
        lp.sell_vstake = scale_side(lp.sell_vstake, lp.sell_stake, sell_stake);
        lp.buy_stake = buy_stake;
        lp.sell_stake = sell_stake;
        lp.stake = new_stake;
        lp.vstake = combined(lp.buy_vstake, lp.sell_vstake, mark_price);

        self.total_stake += new_stake - old_stake;
        self.total_vstake += lp.vstake - old_vstake;

        let delta_v = lp.vstake - old_vstake;
        if new_stake > old_stake && delta_v > Decimal::ZERO && !lp.vstake.is_zero() {
            lp.avg = lp.avg * old_vstake / lp.vstake + self.total_vstake * delta_v / lp.vstake;
        }
    }

    /// 6.2: grows or decays every virtual stake toward the new average trade value.
    pub fn avg_trade_value(&mut self, avg: Decimal, mark_price: Decimal) {
        if !self.opening_auction_ended {
            self.mvp = avg;
            return;
        }
        let growth = if self.mvp.is_zero() {
            Decimal::ZERO
        } else {
            (avg - self.mvp) / self.mvp
        };
        let factor = Decimal::ONE + growth;
        for lp in self.lps.values_mut() {
            let old_vstake = lp.vstake;
            lp.buy_vstake = lp.buy_stake.max(lp.buy_vstake * factor);
            lp.sell_vstake = lp.sell_stake.max(lp.sell_vstake * factor);
            lp.vstake = combined(lp.buy_vstake, lp.sell_vstake, mark_price);
            self.total_vstake += lp.vstake - old_vstake;
        }
        self.mvp = avg;
    }

    /// 6.3: `vstake / total` for every LP not in `excluded`, in party order.
    pub fn shares_except(&mut self, excluded: &BTreeSet<PartyId>) -> BTreeMap<PartyId, Decimal> {
        let excluded_vstake: Decimal = self
            .lps
            .iter()
            .filter(|(party, _)| excluded.contains(*party))
            .map(|(_, lp)| lp.vstake)
            .sum();
        let total = self.total_vstake - excluded_vstake;

        let mut shares = BTreeMap::new();
        for (party, lp) in self.lps.iter_mut() {
            if excluded.contains(party) {
                continue;
            }
            let share = if total.is_zero() { Decimal::ZERO } else { lp.vstake / total };
            if excluded.is_empty() {
                lp.share = share;
            }
            shares.insert(party.clone(), share);
        }
        shares
    }

    pub fn state(&self) -> EquitySharesState {
        EquitySharesState {
            market_value_proxy: self.mvp,
            opening_auction_ended: self.opening_auction_ended,
            total_stake: self.total_stake,
            total_vstake: self.total_vstake,
            lps: self.lps.iter().map(|(p, lp)| (p.clone(), lp.clone())).collect(),
        }
    }

    pub fn restore(state: EquitySharesState) -> Self {
        Self {
            mvp: state.market_value_proxy,
            opening_auction_ended: state.opening_auction_ended,
            total_stake: state.total_stake,
            total_vstake: state.total_vstake,
            lps: state.lps.into_iter().collect(),
        }
    }
}
